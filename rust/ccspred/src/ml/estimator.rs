//! The capability contract every per-cluster regressor implements.

use crate::errors::{
    DataProcessingError,
    Result,
};
use crate::features::FeatureMatrix;
use crate::ml::params::EstimatorParams;

/// An unfitted, configured regression algorithm.
///
/// `with_params` plays the role of "clone and set parameters": it returns
/// a fresh configuration, so one prototype can seed every cluster of an
/// ensemble with different hyperparameters.
pub trait Estimator: Clone + std::fmt::Debug + Send + Sync {
    type Fitted: FittedEstimator;

    fn name(&self) -> &'static str;

    fn with_params(&self, params: &EstimatorParams) -> Result<Self>;

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<Self::Fitted>;
}

/// A fitted regressor, read-only and shareable across threads.
pub trait FittedEstimator: Clone + std::fmt::Debug + Send + Sync {
    fn n_features(&self) -> usize;

    /// Prediction for a single row with `n_features()` columns.
    fn predict_row(&self, row: &[f64]) -> f64;

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.check_ncols(self.n_features(), "FittedEstimator::predict")?;
        Ok(x.rows().map(|r| self.predict_row(r)).collect())
    }
}

/// Rejects empty training data and row/target length mismatches.
pub(crate) fn check_xy(x: &FeatureMatrix, y: &[f64], context: &str) -> Result<()> {
    if x.is_empty() {
        return Err(DataProcessingError::ExpectedNonEmptyData {
            context: Some(context.to_string()),
        }
        .into());
    }
    if x.nrows() != y.len() {
        return Err(DataProcessingError::ExpectedSlicesSameLength {
            expected: x.nrows(),
            other: y.len(),
            context: context.to_string(),
        }
        .into());
    }
    Ok(())
}
