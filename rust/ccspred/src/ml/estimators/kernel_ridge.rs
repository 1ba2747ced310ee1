use nalgebra::{
    DMatrix,
    DVector,
};
use rayon::prelude::*;
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
use crate::features::matrix::squared_euclidean;
use crate::ml::estimator::{
    Estimator,
    FittedEstimator,
    check_xy,
};
use crate::ml::params::EstimatorParams;

/// Kernel ridge regression with an RBF kernel `exp(-gamma * |a - b|^2)`.
///
/// The target is centered before solving so that predictions far from the
/// training rows fall back to the training mean instead of zero.
///
/// Parameters: `alpha` (> 0, default 0.01) and `gamma` (> 0, default 0.01).
/// Fitting is cubic in the number of rows, which is one reason to split
/// the training set across clusters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRidge {
    pub alpha: f64,
    pub gamma: f64,
}

impl Default for KernelRidge {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            gamma: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedKernelRidge {
    gamma: f64,
    y_mean: f64,
    dual_coefficients: Vec<f64>,
    support: FeatureMatrix,
}

fn rbf(gamma: f64, a: &[f64], b: &[f64]) -> f64 {
    (-gamma * squared_euclidean(a, b)).exp()
}

fn positive(name: &'static str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(CcsPredError::config(name, format!("{} must be > 0", value)))
    }
}

impl Estimator for KernelRidge {
    type Fitted = FittedKernelRidge;

    fn name(&self) -> &'static str {
        "kernel_ridge"
    }

    fn with_params(&self, params: &EstimatorParams) -> Result<Self> {
        params.check_known(&["alpha", "gamma"], self.name())?;
        Ok(Self {
            alpha: positive("alpha", params.get_f64("alpha")?.unwrap_or(self.alpha))?,
            gamma: positive("gamma", params.get_f64("gamma")?.unwrap_or(self.gamma))?,
        })
    }

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<FittedKernelRidge> {
        check_xy(x, y, "KernelRidge::fit")?;
        let n = x.nrows();
        let y_mean = y.iter().sum::<f64>() / n as f64;
        let centered = DVector::from_iterator(n, y.iter().map(|v| v - y_mean));

        let kernel: Vec<f64> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                let row_i = x.row(i);
                (0..n).map(move |j| rbf(self.gamma, row_i, x.row(j)))
            })
            .collect();
        let mut gram = DMatrix::from_row_slice(n, n, &kernel);
        for i in 0..n {
            gram[(i, i)] += self.alpha;
        }

        let chol = gram.cholesky().ok_or_else(|| {
            CcsPredError::from(DataProcessingError::SingularSystem {
                context: "KernelRidge::fit: kernel matrix not positive definite".to_string(),
            })
        })?;
        let dual_coefficients: Vec<f64> = chol.solve(&centered).iter().copied().collect();

        Ok(FittedKernelRidge {
            gamma: self.gamma,
            y_mean,
            dual_coefficients,
            support: x.clone(),
        })
    }
}

impl FittedEstimator for FittedKernelRidge {
    fn n_features(&self) -> usize {
        self.support.ncols()
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        self.y_mean
            + self
                .support
                .rows()
                .zip(self.dual_coefficients.iter())
                .map(|(s, a)| a * rbf(self.gamma, row, s))
                .sum::<f64>()
    }
}
