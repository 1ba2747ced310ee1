pub mod kernel_ridge;
pub mod ridge;
pub mod svr;

use serde::{
    Deserialize,
    Serialize,
};
use std::str::FromStr;

pub use kernel_ridge::{
    FittedKernelRidge,
    KernelRidge,
};
pub use ridge::{
    FittedRidge,
    Ridge,
};
pub use svr::{
    FittedSvr,
    Svr,
};

use crate::errors::{
    CcsPredError,
    Result,
};
use crate::features::FeatureMatrix;
use crate::ml::estimator::{
    Estimator,
    FittedEstimator,
};
use crate::ml::params::EstimatorParams;

/// Estimator selected at runtime from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnyEstimator {
    Svr(Svr),
    Ridge(Ridge),
    KernelRidge(KernelRidge),
}

impl Default for AnyEstimator {
    fn default() -> Self {
        Self::Svr(Svr::default())
    }
}

impl FromStr for AnyEstimator {
    type Err = CcsPredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "svr" => Ok(Self::Svr(Svr::default())),
            "ridge" => Ok(Self::Ridge(Ridge::default())),
            "kernel_ridge" => Ok(Self::KernelRidge(KernelRidge::default())),
            other => Err(CcsPredError::config(
                "estimator",
                format!("'{}' is not one of 'svr', 'ridge', 'kernel_ridge'", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnyFitted {
    Svr(FittedSvr),
    Ridge(FittedRidge),
    KernelRidge(FittedKernelRidge),
}

impl Estimator for AnyEstimator {
    type Fitted = AnyFitted;

    fn name(&self) -> &'static str {
        match self {
            Self::Svr(e) => e.name(),
            Self::Ridge(e) => e.name(),
            Self::KernelRidge(e) => e.name(),
        }
    }

    fn with_params(&self, params: &EstimatorParams) -> Result<Self> {
        Ok(match self {
            Self::Svr(e) => Self::Svr(e.with_params(params)?),
            Self::Ridge(e) => Self::Ridge(e.with_params(params)?),
            Self::KernelRidge(e) => Self::KernelRidge(e.with_params(params)?),
        })
    }

    fn fit(&self, x: &FeatureMatrix, y: &[f64]) -> Result<AnyFitted> {
        Ok(match self {
            Self::Svr(e) => AnyFitted::Svr(e.fit(x, y)?),
            Self::Ridge(e) => AnyFitted::Ridge(e.fit(x, y)?),
            Self::KernelRidge(e) => AnyFitted::KernelRidge(e.fit(x, y)?),
        })
    }
}

impl FittedEstimator for AnyFitted {
    fn n_features(&self) -> usize {
        match self {
            Self::Svr(m) => m.n_features(),
            Self::Ridge(m) => m.n_features(),
            Self::KernelRidge(m) => m.n_features(),
        }
    }

    fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            Self::Svr(m) => m.predict_row(row),
            Self::Ridge(m) => m.predict_row(row),
            Self::KernelRidge(m) => m.predict_row(row),
        }
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        match self {
            Self::Svr(m) => m.predict(x),
            Self::Ridge(m) => m.predict(x),
            Self::KernelRidge(m) => m.predict(x),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_str_and_serde_tag() {
        let est: AnyEstimator = "ridge".parse().unwrap();
        assert_eq!(est.name(), "ridge");
        let json = serde_json::to_string(&est).unwrap();
        assert!(json.contains("\"type\":\"ridge\""), "{}", json);
        let back: AnyEstimator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, est);

        assert!(matches!("svr".parse::<AnyEstimator>(), Ok(AnyEstimator::Svr(_))));
        match "lasso".parse::<AnyEstimator>() {
            Err(CcsPredError::Configuration { key, .. }) => assert_eq!(key, "estimator"),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_with_params_dispatches() {
        let est = AnyEstimator::default()
            .with_params(&EstimatorParams::new().with("C", 1000i64).with("gamma", 0.5))
            .unwrap();
        match est {
            AnyEstimator::Svr(s) => {
                assert_eq!(s.c, 1000.0);
                assert_eq!(s.gamma, 0.5);
            }
            other => panic!("unexpected {:?}", other),
        }
        let kr: AnyEstimator = "kernel_ridge".parse().unwrap();
        match kr.with_params(&EstimatorParams::new().with("gamma", 0.5)).unwrap() {
            AnyEstimator::KernelRidge(k) => assert_eq!(k.gamma, 0.5),
            other => panic!("unexpected {:?}", other),
        }
    }
}
