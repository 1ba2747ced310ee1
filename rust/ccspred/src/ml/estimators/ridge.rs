use nalgebra::DVector;
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};
use crate::features::FeatureMatrix;
use crate::ml::estimator::{
    Estimator,
    FittedEstimator,
    check_xy,
};
use crate::ml::params::EstimatorParams;

/// L2-regularized linear least squares.
///
/// Parameters: `alpha` (>= 0, default 1.0) and `fit_intercept`
/// (default true, the intercept is never penalized).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ridge {
    pub alpha: f64,
    pub fit_intercept: bool,
}

impl Default for Ridge {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            fit_intercept: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedRidge {
    coefficients: Vec<f64>,
    intercept: f64,
}

impl FittedRidge {
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }
}

impl Estimator for Ridge {
    type Fitted = FittedRidge;

    fn name(&self) -> &'static str {
        "ridge"
    }

    fn with_params(&self, params: &EstimatorParams) -> Result<Self> {
        params.check_known(&["alpha", "fit_intercept"], self.name())?;
        let alpha = params.get_f64("alpha")?.unwrap_or(self.alpha);
        if !(alpha >= 0.0 && alpha.is_finite()) {
            return Err(CcsPredError::config("alpha", format!("{} must be >= 0", alpha)));
        }
        Ok(Self {
            alpha,
            fit_intercept: params
                .get_bool("fit_intercept")?
                .unwrap_or(self.fit_intercept),
        })
    }

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<FittedRidge> {
        check_xy(x, y, "Ridge::fit")?;
        let n = x.nrows();
        let p = x.ncols();

        let (x_mean, y_mean) = if self.fit_intercept {
            let mut x_mean = vec![0.0; p];
            for row in x.rows() {
                x_mean.iter_mut().zip(row).for_each(|(m, v)| *m += v);
            }
            x_mean.iter_mut().for_each(|m| *m /= n as f64);
            (x_mean, y.iter().sum::<f64>() / n as f64)
        } else {
            (vec![0.0; p], 0.0)
        };

        // Normal equations on centered data: (Xc^T Xc + alpha I) beta = Xc^T yc
        let mut xc = x.to_dmatrix();
        for (j, m) in x_mean.iter().enumerate() {
            xc.column_mut(j).add_scalar_mut(-m);
        }
        let yc = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));
        let mut gram = xc.tr_mul(&xc);
        for i in 0..p {
            gram[(i, i)] += self.alpha;
        }
        let rhs = xc.tr_mul(&yc);

        // Cholesky needs a positive definite gram, LU covers alpha == 0.
        let beta = match gram.clone().cholesky() {
            Some(chol) => Some(chol.solve(&rhs)),
            None => gram.lu().solve(&rhs),
        }
        .ok_or_else(|| {
            CcsPredError::from(DataProcessingError::SingularSystem {
                context: "Ridge::fit: normal equations are singular".to_string(),
            })
        })?;
        let coefficients: Vec<f64> = beta.iter().copied().collect();
        let intercept = y_mean
            - coefficients
                .iter()
                .zip(x_mean.iter())
                .map(|(b, m)| b * m)
                .sum::<f64>();

        Ok(FittedRidge {
            coefficients,
            intercept,
        })
    }
}

impl FittedEstimator for FittedRidge {
    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept
            + row
                .iter()
                .zip(self.coefficients.iter())
                .map(|(v, b)| v * b)
                .sum::<f64>()
    }
}
