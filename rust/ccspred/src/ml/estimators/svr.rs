use linfa::Dataset;
use linfa::traits::{
    Fit,
    Predict,
};
use linfa_svm::Svm;
use ndarray::{
    Array1,
    ArrayView1,
    Axis,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    CcsPredError,
    Result,
};
use crate::features::FeatureMatrix;
use crate::ml::estimator::{
    Estimator,
    FittedEstimator,
    check_xy,
};
use crate::ml::params::EstimatorParams;

/// Epsilon-insensitive support vector regression with an RBF kernel
/// `exp(-gamma * |a - b|^2)`, solved by `linfa-svm`.
///
/// Parameters: `C` (> 0, default 100), `gamma` (> 0, default 0.01) and
/// `epsilon`, the half width of the loss tube (> 0, default 0.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Svr {
    #[serde(rename = "C")]
    pub c: f64,
    pub gamma: f64,
    pub epsilon: f64,
}

impl Default for Svr {
    fn default() -> Self {
        Self {
            c: 100.0,
            gamma: 0.01,
            epsilon: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittedSvr {
    n_features: usize,
    model: Svm<f64, f64>,
}

impl FittedSvr {
    pub fn n_support_vectors(&self) -> usize {
        self.model.nsupport()
    }
}

fn positive(name: &'static str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value)
    } else {
        Err(CcsPredError::config(name, format!("{} must be > 0", value)))
    }
}

impl Estimator for Svr {
    type Fitted = FittedSvr;

    fn name(&self) -> &'static str {
        "svr"
    }

    fn with_params(&self, params: &EstimatorParams) -> Result<Self> {
        params.check_known(&["C", "gamma", "epsilon"], self.name())?;
        Ok(Self {
            c: positive("C", params.get_f64("C")?.unwrap_or(self.c))?,
            gamma: positive("gamma", params.get_f64("gamma")?.unwrap_or(self.gamma))?,
            epsilon: positive(
                "epsilon",
                params.get_f64("epsilon")?.unwrap_or(self.epsilon),
            )?,
        })
    }

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<FittedSvr> {
        check_xy(x, y, "Svr::fit")?;
        let dataset = Dataset::new(x.to_ndarray()?, Array1::from(y.to_vec()));
        // linfa parameterizes the gaussian kernel by its width, exp(-d^2 / eps)
        let model = Svm::<f64, f64>::params()
            .c_svr(self.c, Some(self.epsilon))
            .gaussian_kernel(1.0 / self.gamma)
            .fit(&dataset)
            .map_err(|e| CcsPredError::fit(self.name(), e))?;
        Ok(FittedSvr {
            n_features: x.ncols(),
            model,
        })
    }
}

impl FittedEstimator for FittedSvr {
    fn n_features(&self) -> usize {
        self.n_features
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        let view = ArrayView1::from(row).insert_axis(Axis(0));
        let out: Array1<f64> = self.model.predict(&view);
        out[0]
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.check_ncols(self.n_features, "FittedSvr::predict")?;
        let out: Array1<f64> = self.model.predict(&x.to_ndarray()?);
        Ok(out.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_data() -> (FeatureMatrix, Vec<f64>) {
        let rows: Vec<Vec<f64>> = (0..60).map(|i| vec![i as f64 / 10.0]).collect();
        let y: Vec<f64> = rows.iter().map(|r| 2.0 * r[0].sin()).collect();
        (FeatureMatrix::from_rows(&rows).unwrap(), y)
    }

    #[test]
    fn test_fits_smooth_nonlinear_function() {
        let (x, y) = sine_data();
        let model = Svr {
            c: 100.0,
            gamma: 1.0,
            epsilon: 0.01,
        }
        .fit(&x, &y)
        .unwrap();
        let preds = model.predict(&x).unwrap();
        let mse = preds
            .iter()
            .zip(y.iter())
            .map(|(p, t)| (p - t).powi(2))
            .sum::<f64>()
            / y.len() as f64;
        assert!(mse < 0.05, "mse {}", mse);
        assert!(model.n_support_vectors() > 0);
    }

    #[test]
    fn test_row_and_batch_predictions_agree() {
        let (x, y) = sine_data();
        let model = Svr::default()
            .with_params(&EstimatorParams::new().with("gamma", 0.5))
            .unwrap()
            .fit(&x, &y)
            .unwrap();
        let batch = model.predict(&x).unwrap();
        for (i, b) in batch.iter().enumerate() {
            assert!((model.predict_row(x.row(i)) - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_with_params() {
        let base = Svr::default();
        let tuned = base
            .with_params(&EstimatorParams::new().with("C", 1000i64).with("gamma", 0.001))
            .unwrap();
        assert_eq!(tuned.c, 1000.0);
        assert_eq!(tuned.gamma, 0.001);
        assert_eq!(tuned.epsilon, base.epsilon);
        assert!(base
            .with_params(&EstimatorParams::new().with("C", 0.0))
            .is_err());
        assert!(base
            .with_params(&EstimatorParams::new().with("alpha", 1.0))
            .is_err());
    }

    #[test]
    fn test_fitted_model_survives_json() {
        let (x, y) = sine_data();
        let model = Svr::default().fit(&x, &y).unwrap();
        let json = serde_json::to_string(&model).unwrap();
        let back: FittedSvr = serde_json::from_str(&json).unwrap();
        assert_eq!(back.n_features(), 1);
        assert_eq!(back.predict(&x).unwrap(), model.predict(&x).unwrap());
    }
}
