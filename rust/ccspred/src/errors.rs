use std::path::PathBuf;

#[derive(Debug)]
pub enum DataProcessingError {
    ExpectedSlicesSameLength {
        expected: usize,
        other: usize,
        context: String,
    },
    ExpectedNonEmptyData {
        context: Option<String>,
    },
    ExpectedFiniteNonNanData {
        context: String,
    },
    /// A matrix or vector does not have the column layout it was fit with.
    DimensionMismatch {
        expected: usize,
        other: usize,
        context: String,
    },
    SingularSystem {
        context: String,
    },
}

impl DataProcessingError {
    pub fn append_to_context(mut self, context: &str) -> Self {
        match &mut self {
            DataProcessingError::ExpectedSlicesSameLength {
                context: owned_context,
                ..
            } => {
                owned_context.push_str(context);
            }
            DataProcessingError::ExpectedNonEmptyData {
                context: owned_context,
            } => match owned_context {
                Some(x) => x.push_str(context),
                None => *owned_context = Some(context.to_string()),
            },
            DataProcessingError::ExpectedFiniteNonNanData {
                context: owned_context,
            } => {
                owned_context.push_str(context);
            }
            DataProcessingError::DimensionMismatch {
                context: owned_context,
                ..
            } => {
                owned_context.push_str(context);
            }
            DataProcessingError::SingularSystem {
                context: owned_context,
            } => {
                owned_context.push_str(context);
            }
        }
        self
    }
}

#[derive(Debug)]
pub enum CcsPredError {
    /// An option is missing, malformed or outside its valid range.
    Configuration {
        key: &'static str,
        msg: String,
    },
    /// An operation was invoked before the fit it depends on.
    State {
        operation: &'static str,
        requires: &'static str,
    },
    UnknownCategory {
        value: String,
    },
    DegenerateFeature {
        column: usize,
    },
    EmptyCluster {
        cluster: usize,
        n_clusters: usize,
    },
    UndersizedCluster {
        cluster: usize,
        size: usize,
        min_size: usize,
    },
    /// Relative error is undefined for a true value of exactly zero.
    ZeroTarget {
        index: usize,
    },
    /// A model library rejected the data or failed while fitting.
    Fit {
        estimator: &'static str,
        msg: String,
    },
    /// A persisted artifact whose parts do not fit together.
    InvalidModel {
        msg: String,
    },
    DataProcessing(DataProcessingError),
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },
    ParseError {
        msg: String,
    },
}

impl std::fmt::Display for CcsPredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for CcsPredError {}

pub type Result<T> = std::result::Result<T, CcsPredError>;

impl CcsPredError {
    pub fn config(key: &'static str, msg: impl Into<String>) -> Self {
        Self::Configuration {
            key,
            msg: msg.into(),
        }
    }

    pub fn fit(estimator: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Fit {
            estimator,
            msg: err.to_string(),
        }
    }

    pub fn invalid_model(msg: impl Into<String>) -> Self {
        Self::InvalidModel { msg: msg.into() }
    }

    pub fn dimension_mismatch(expected: usize, other: usize, context: &str) -> Self {
        Self::DataProcessing(DataProcessingError::DimensionMismatch {
            expected,
            other,
            context: context.to_string(),
        })
    }
}

impl From<DataProcessingError> for CcsPredError {
    fn from(x: DataProcessingError) -> Self {
        Self::DataProcessing(x)
    }
}

impl From<serde_json::Error> for CcsPredError {
    fn from(val: serde_json::Error) -> Self {
        CcsPredError::ParseError {
            msg: val.to_string(),
        }
    }
}

impl From<csv::Error> for CcsPredError {
    fn from(val: csv::Error) -> Self {
        CcsPredError::ParseError {
            msg: val.to_string(),
        }
    }
}

impl From<std::num::ParseFloatError> for CcsPredError {
    fn from(x: std::num::ParseFloatError) -> Self {
        Self::ParseError { msg: x.to_string() }
    }
}
