use serde::{
    Deserialize,
    Serialize,
};

use super::matrix::FeatureMatrix;
use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum EncoderState {
    #[default]
    Unfit,
    Fitted {
        categories: Vec<String>,
    },
}

/// One-hot encoding of a categorical column with a fixed column order.
///
/// Fit once, then persisted and reused; refitting a fitted encoder is
/// refused so the meaning of the columns can not drift between training
/// and inference.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OneHotEncoder {
    state: EncoderState,
}

impl OneHotEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Learns the distinct categories (sorted) and their column positions.
    pub fn fit<S: AsRef<str>>(self, values: &[S]) -> Result<Self> {
        if self.is_fitted() {
            return Err(CcsPredError::State {
                operation: "OneHotEncoder::fit",
                requires: "an unfit encoder (construct a new one to refit)",
            });
        }
        if values.is_empty() {
            return Err(DataProcessingError::ExpectedNonEmptyData {
                context: Some("OneHotEncoder::fit".to_string()),
            }
            .into());
        }
        let mut categories: Vec<String> = values.iter().map(|v| v.as_ref().to_string()).collect();
        categories.sort_unstable();
        categories.dedup();
        Ok(Self {
            state: EncoderState::Fitted { categories },
        })
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, EncoderState::Fitted { .. })
    }

    pub fn categories(&self) -> Result<&[String]> {
        match &self.state {
            EncoderState::Fitted { categories } => Ok(categories),
            EncoderState::Unfit => Err(CcsPredError::State {
                operation: "OneHotEncoder::categories",
                requires: "OneHotEncoder::fit",
            }),
        }
    }

    /// Checks an encoder restored from disk: column lookup relies on the
    /// categories being sorted and unique.
    pub fn validate(&self) -> Result<()> {
        let categories = self.categories()?;
        if categories.windows(2).any(|w| w[0] >= w[1]) {
            return Err(CcsPredError::invalid_model(format!(
                "encoder categories are not sorted and unique: {:?}",
                categories
            )));
        }
        Ok(())
    }

    pub fn n_columns(&self) -> Result<usize> {
        Ok(self.categories()?.len())
    }

    pub fn column_of(&self, value: &str) -> Result<usize> {
        let categories = self.categories()?;
        categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .map_err(|_| CcsPredError::UnknownCategory {
                value: value.to_string(),
            })
    }

    /// Writes the one-hot encoding of `value` into `out`, which must be
    /// exactly [`OneHotEncoder::n_columns`] wide.
    pub fn encode_into(&self, value: &str, out: &mut [f64]) -> Result<()> {
        let n = self.n_columns()?;
        if out.len() != n {
            return Err(CcsPredError::dimension_mismatch(
                n,
                out.len(),
                "OneHotEncoder::encode_into",
            ));
        }
        let col = self.column_of(value)?;
        out.iter_mut().for_each(|v| *v = 0.0);
        out[col] = 1.0;
        Ok(())
    }

    pub fn transform<S: AsRef<str>>(&self, values: &[S]) -> Result<FeatureMatrix> {
        let n = self.n_columns().map_err(|_| CcsPredError::State {
            operation: "OneHotEncoder::transform",
            requires: "OneHotEncoder::fit",
        })?;
        let mut out = FeatureMatrix::zeros(values.len(), n);
        for (i, v) in values.iter().enumerate() {
            self.encode_into(v.as_ref(), out.row_mut(i))?;
        }
        Ok(out)
    }
}
