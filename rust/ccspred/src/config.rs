use serde::{
    Deserialize,
    Serialize,
};
use std::path::Path;

use crate::data::DEFAULT_COMMON_ADDUCTS;
use crate::errors::{
    CcsPredError,
    Result,
};
use crate::features::{
    DescriptorSelection,
    FeatureConfig,
    ZeroVariancePolicy,
};
use crate::ml::{
    AnyEstimator,
    DEFAULT_MAX_CONFIGURATIONS,
    EnsembleOptions,
    Estimator,
    GridSearchOptions,
    KMeansOptions,
    ParameterGrid,
    ZeroTargetPolicy,
};
use crate::split::StratifyBy;

/// Every option of a training run.
///
/// Missing keys take their defaults, unknown keys are rejected. Mode
/// strings (`stratify_by`, `estimator`, `zero_variance`, `zero_target`) are
/// resolved by [`PipelineConfig::validate`] so a bad value is reported with
/// the offending key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub include_encoded_adduct: bool,
    pub descriptor_selection: DescriptorSelection,
    /// `"source"` or `"target_bins"`.
    pub stratify_by: String,
    pub test_fraction: f64,
    pub seed: u64,
    pub cluster_counts: Vec<usize>,
    pub per_estimator_grid: ParameterGrid,
    /// `"svr"`, `"ridge"` or `"kernel_ridge"`.
    pub estimator: String,
    pub common_adducts: Vec<String>,
    pub cv_folds: usize,
    pub max_grid_configurations: usize,
    pub kmeans_max_iter: usize,
    pub kmeans_n_init: usize,
    pub kmeans_tol: f64,
    pub min_cluster_size: usize,
    /// `"unit_scale"` or `"error"`.
    pub zero_variance: String,
    /// `"error"` or `"skip_row"`.
    pub zero_target: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            include_encoded_adduct: true,
            descriptor_selection: DescriptorSelection::All,
            stratify_by: "source".to_string(),
            test_fraction: 0.2,
            seed: 69,
            cluster_counts: vec![5],
            per_estimator_grid: ParameterGrid::new()
                .with("C", [100.0, 1000.0])
                .with("gamma", [0.001, 0.01]),
            estimator: "svr".to_string(),
            common_adducts: DEFAULT_COMMON_ADDUCTS.iter().map(|s| s.to_string()).collect(),
            cv_folds: 5,
            max_grid_configurations: DEFAULT_MAX_CONFIGURATIONS,
            kmeans_max_iter: 300,
            kmeans_n_init: 10,
            kmeans_tol: 1e-4,
            min_cluster_size: 1,
            zero_variance: "unit_scale".to_string(),
            zero_target: "error".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| CcsPredError::Io {
            source,
            path: Some(path.to_path_buf()),
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn feature_config(&self) -> FeatureConfig {
        FeatureConfig {
            include_encoded_adduct: self.include_encoded_adduct,
            descriptor_selection: self.descriptor_selection.clone(),
            common_adducts: self.common_adducts.clone(),
        }
    }

    pub fn stratify_by(&self) -> Result<StratifyBy> {
        self.stratify_by.parse()
    }

    pub fn estimator(&self) -> Result<AnyEstimator> {
        self.estimator.parse()
    }

    pub fn zero_variance(&self) -> Result<ZeroVariancePolicy> {
        self.zero_variance.parse()
    }

    pub fn zero_target(&self) -> Result<ZeroTargetPolicy> {
        self.zero_target.parse()
    }

    pub fn ensemble_options(&self) -> EnsembleOptions {
        EnsembleOptions {
            kmeans: KMeansOptions {
                max_iter: self.kmeans_max_iter,
                n_init: self.kmeans_n_init,
                tol: self.kmeans_tol,
            },
            min_cluster_size: self.min_cluster_size,
        }
    }

    pub fn grid_search_options(&self, show_progress: bool) -> GridSearchOptions {
        GridSearchOptions {
            n_folds: self.cv_folds,
            seed: self.seed,
            ensemble: self.ensemble_options(),
            show_progress,
            max_configurations: self.max_grid_configurations,
        }
    }

    /// Checks every range and resolves every mode string.
    pub fn validate(&self) -> Result<()> {
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(CcsPredError::config(
                "test_fraction",
                format!("{} is not in (0, 1)", self.test_fraction),
            ));
        }
        if self.cluster_counts.is_empty() || self.cluster_counts.contains(&0) {
            return Err(CcsPredError::config(
                "cluster_counts",
                "needs at least one value, every value >= 1",
            ));
        }
        if self.cv_folds < 2 {
            return Err(CcsPredError::config("cv_folds", "must be >= 2"));
        }
        if self.max_grid_configurations == 0 {
            return Err(CcsPredError::config("max_grid_configurations", "must be >= 1"));
        }
        if self.kmeans_max_iter == 0 {
            return Err(CcsPredError::config("kmeans_max_iter", "must be >= 1"));
        }
        if self.kmeans_n_init == 0 {
            return Err(CcsPredError::config("kmeans_n_init", "must be >= 1"));
        }
        if !(self.kmeans_tol >= 0.0 && self.kmeans_tol.is_finite()) {
            return Err(CcsPredError::config("kmeans_tol", "must be a finite value >= 0"));
        }
        if self.min_cluster_size == 0 {
            return Err(CcsPredError::config("min_cluster_size", "must be >= 1"));
        }
        self.descriptor_selection.resolve()?;
        self.stratify_by()?;
        self.zero_variance()?;
        self.zero_target()?;

        let estimator = self.estimator()?;
        for combination in self.per_estimator_grid.combinations()? {
            estimator.with_params(&combination)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid_and_roundtrips() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        let json = config.to_json_pretty().unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: PipelineConfig = serde_json::from_str(
            r#"{"descriptor_selection": [0, 1, 2], "stratify_by": "target_bins", "cluster_counts": [1, 2]}"#,
        )
        .unwrap();
        assert_eq!(
            config.descriptor_selection,
            DescriptorSelection::Indices(vec![0, 1, 2])
        );
        assert_eq!(config.stratify_by().unwrap(), StratifyBy::TargetBins);
        assert_eq!(config.cv_folds, 5);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_values_name_their_key() {
        let cases: Vec<(PipelineConfig, &str)> = vec![
            (
                PipelineConfig {
                    test_fraction: 1.0,
                    ..Default::default()
                },
                "test_fraction",
            ),
            (
                PipelineConfig {
                    stratify_by: "mass".to_string(),
                    ..Default::default()
                },
                "stratify_by",
            ),
            (
                PipelineConfig {
                    descriptor_selection: DescriptorSelection::Indices(vec![42]),
                    ..Default::default()
                },
                "descriptor_selection",
            ),
            (
                PipelineConfig {
                    estimator: "lasso".to_string(),
                    ..Default::default()
                },
                "estimator",
            ),
            (
                PipelineConfig {
                    per_estimator_grid: ParameterGrid::new().with("alpha", [1.0]),
                    ..Default::default()
                },
                "per_estimator_grid",
            ),
            (
                PipelineConfig {
                    max_grid_configurations: 0,
                    ..Default::default()
                },
                "max_grid_configurations",
            ),
            (
                PipelineConfig {
                    cluster_counts: vec![],
                    ..Default::default()
                },
                "cluster_counts",
            ),
        ];
        for (config, expected_key) in cases {
            match config.validate() {
                Err(CcsPredError::Configuration { key, .. }) => assert_eq!(key, expected_key),
                other => panic!("expected error on {}, got {:?}", expected_key, other),
            }
        }
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let res: std::result::Result<PipelineConfig, _> =
            serde_json::from_str(r#"{"n_clusters": [3]}"#);
        assert!(res.is_err());
    }
}
