use serde::{
    Deserialize,
    Serialize,
};
use std::str::FromStr;
use tracing::warn;

use super::matrix::FeatureMatrix;
use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};

/// What to do with a training column whose standard deviation is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroVariancePolicy {
    /// Center the column but leave it unscaled (scale of 1), logging a warning.
    #[default]
    UnitScale,
    /// Fail with [`CcsPredError::DegenerateFeature`].
    Error,
}

impl FromStr for ZeroVariancePolicy {
    type Err = CcsPredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unit_scale" => Ok(Self::UnitScale),
            "error" => Ok(Self::Error),
            other => Err(CcsPredError::config(
                "zero_variance",
                format!("'{}' is not one of 'unit_scale', 'error'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum ScalerState {
    #[default]
    Unfit,
    Fitted {
        means: Vec<f64>,
        scales: Vec<f64>,
        /// Columns that had zero variance at fit time and kept a scale of 1.
        degenerate_columns: Vec<usize>,
    },
}

/// Per-column centering and scaling to zero mean and unit variance.
///
/// Fit on the training split only, then applied unchanged to training,
/// held-out and inference matrices with the same column layout.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    policy: ZeroVariancePolicy,
    state: ScalerState,
}

impl StandardScaler {
    pub fn new(policy: ZeroVariancePolicy) -> Self {
        Self {
            policy,
            state: ScalerState::Unfit,
        }
    }

    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "debug")
    )]
    pub fn fit(self, x: &FeatureMatrix) -> Result<Self> {
        if self.is_fitted() {
            return Err(CcsPredError::State {
                operation: "StandardScaler::fit",
                requires: "an unfit scaler (construct a new one to refit)",
            });
        }
        if x.is_empty() {
            return Err(DataProcessingError::ExpectedNonEmptyData {
                context: Some("StandardScaler::fit".to_string()),
            }
            .into());
        }

        let stats = x.column_stats();

        let mut means = Vec::with_capacity(stats.len());
        let mut scales = Vec::with_capacity(stats.len());
        let mut degenerate_columns = Vec::new();
        for (j, calc) in stats.iter().enumerate() {
            // Non-empty matrix, so every column has at least one value.
            let mean = calc.mean().unwrap_or(0.0);
            let std = calc.standard_deviation().unwrap_or(0.0);
            if !mean.is_finite() || !std.is_finite() {
                return Err(DataProcessingError::ExpectedFiniteNonNanData {
                    context: format!("StandardScaler::fit column {}", j),
                }
                .into());
            }
            let scale = if calc.is_constant() || std == 0.0 {
                match self.policy {
                    ZeroVariancePolicy::Error => {
                        return Err(CcsPredError::DegenerateFeature { column: j });
                    }
                    ZeroVariancePolicy::UnitScale => {
                        degenerate_columns.push(j);
                        1.0
                    }
                }
            } else {
                std
            };
            means.push(mean);
            scales.push(scale);
        }

        if !degenerate_columns.is_empty() {
            warn!(
                "{} zero-variance column(s) left unscaled: {:?}",
                degenerate_columns.len(),
                degenerate_columns
            );
        }

        Ok(Self {
            policy: self.policy,
            state: ScalerState::Fitted {
                means,
                scales,
                degenerate_columns,
            },
        })
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, ScalerState::Fitted { .. })
    }

    pub fn n_features(&self) -> Result<usize> {
        Ok(self.parameters("StandardScaler::n_features")?.0.len())
    }

    pub fn means(&self) -> Result<&[f64]> {
        Ok(self.parameters("StandardScaler::means")?.0)
    }

    pub fn scales(&self) -> Result<&[f64]> {
        Ok(self.parameters("StandardScaler::scales")?.1)
    }

    pub fn degenerate_columns(&self) -> Result<&[usize]> {
        match &self.state {
            ScalerState::Fitted {
                degenerate_columns, ..
            } => Ok(degenerate_columns),
            ScalerState::Unfit => Err(CcsPredError::State {
                operation: "StandardScaler::degenerate_columns",
                requires: "StandardScaler::fit",
            }),
        }
    }

    fn parameters(&self, operation: &'static str) -> Result<(&[f64], &[f64])> {
        match &self.state {
            ScalerState::Fitted { means, scales, .. } => Ok((means, scales)),
            ScalerState::Unfit => Err(CcsPredError::State {
                operation,
                requires: "StandardScaler::fit",
            }),
        }
    }

    /// Checks a fitted scaler restored from disk: one finite mean and one
    /// positive scale per column.
    pub fn validate(&self) -> Result<()> {
        let (means, scales) = self.parameters("StandardScaler::validate")?;
        if means.len() != scales.len() {
            return Err(CcsPredError::invalid_model(format!(
                "scaler has {} means but {} scales",
                means.len(),
                scales.len()
            )));
        }
        if let Some(j) = (0..means.len())
            .find(|&j| !means[j].is_finite() || !(scales[j] > 0.0 && scales[j].is_finite()))
        {
            return Err(CcsPredError::invalid_model(format!(
                "scaler column {} has mean {} and scale {}",
                j, means[j], scales[j]
            )));
        }
        Ok(())
    }

    pub fn transform_row(&self, row: &mut [f64]) -> Result<()> {
        let (means, scales) = self.parameters("StandardScaler::transform_row")?;
        if row.len() != means.len() {
            return Err(CcsPredError::dimension_mismatch(
                means.len(),
                row.len(),
                "StandardScaler::transform_row",
            ));
        }
        row.iter_mut()
            .zip(means.iter().zip(scales.iter()))
            .for_each(|(v, (m, s))| *v = (*v - m) / s);
        Ok(())
    }

    pub fn transform(&self, x: &FeatureMatrix) -> Result<FeatureMatrix> {
        let (means, _) = self.parameters("StandardScaler::transform")?;
        x.check_ncols(means.len(), "StandardScaler::transform")?;
        let mut out = x.clone();
        for i in 0..out.nrows() {
            self.transform_row(out.row_mut(i))?;
        }
        Ok(out)
    }
}
