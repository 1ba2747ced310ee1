//! Training and inference stages.
//!
//! Each stage is a function from the previous stage's value to a new one:
//!
//! ```text
//! records -> AssembledData -> SplitData -> ScaledData -> TrainedModel
//! ```
//!
//! A [`TrainedModel`] bundles the fitted assembler, scaler and ensemble, and
//! is everything inference needs.

use serde::{
    Deserialize,
    Serialize,
};
use std::path::Path;
use std::time::Instant;
use tracing::{
    info,
    warn,
};

use crate::config::PipelineConfig;
use crate::data::{
    CombinedDataset,
    CompoundRecord,
};
use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};
use crate::features::{
    FeatureAssembler,
    FeatureLayout,
    FeatureMatrix,
    StandardScaler,
    ZeroVariancePolicy,
};
use crate::ml::{
    AnyEstimator,
    ClusterEnsemble,
    GridConfiguration,
    GridScore,
    RegressionMetrics,
    RoutedPrediction,
    TrainTestSummary,
    ZeroTargetPolicy,
    compute_metrics,
    expand_grid,
    grid_search,
};
use crate::split::SplitData;

/// Output of the scaling stage; the scaler is fit on the training rows only.
#[derive(Debug, Clone)]
pub struct ScaledData {
    pub x_train: FeatureMatrix,
    pub y_train: Vec<f64>,
    pub x_test: FeatureMatrix,
    pub y_test: Vec<f64>,
    pub scaler: StandardScaler,
    pub layout: FeatureLayout,
}

impl ScaledData {
    pub fn from_split(split: SplitData, policy: ZeroVariancePolicy) -> Result<Self> {
        let scaler = StandardScaler::new(policy).fit(&split.x_train)?;
        Ok(Self {
            x_train: scaler.transform(&split.x_train)?,
            x_test: scaler.transform(&split.x_test)?,
            y_train: split.y_train,
            y_test: split.y_test,
            scaler,
            layout: split.layout,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedModel {
    pub assembler: FeatureAssembler,
    pub scaler: StandardScaler,
    pub ensemble: ClusterEnsemble<AnyEstimator>,
    pub configuration: GridConfiguration,
}

impl TrainedModel {
    /// Predictions for an unscaled feature matrix in the assembler layout.
    pub fn predict_matrix(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        x.check_ncols(self.assembler.n_features(), "TrainedModel::predict_matrix")?;
        self.ensemble.predict(&self.scaler.transform(x)?)
    }

    /// Checks that the parts of a deserialized model fit together.
    pub fn validate(&self) -> Result<()> {
        self.assembler.validate()?;
        self.scaler.validate()?;
        self.ensemble.validate()?;
        let width = self.assembler.n_features();
        for (part, n) in [
            ("scaler", self.scaler.n_features()?),
            ("ensemble", self.ensemble.n_features()?),
        ] {
            if n != width {
                return Err(CcsPredError::invalid_model(format!(
                    "{} expects {} features, the assembler produces {}",
                    part, n, width
                )));
            }
        }
        if self.configuration.n_clusters != self.ensemble.router()?.n_clusters() {
            return Err(CcsPredError::invalid_model(format!(
                "configuration names k={}, the router holds {} clusters",
                self.configuration.n_clusters,
                self.ensemble.router()?.n_clusters()
            )));
        }
        Ok(())
    }

    /// One routed prediction per record, `None` for records the assembler
    /// excludes.
    pub fn predict_records(
        &self,
        records: &[CompoundRecord],
    ) -> Result<Vec<Option<RoutedPrediction>>> {
        let mut kept = Vec::with_capacity(records.len());
        let mut values = Vec::new();
        for (i, rec) in records.iter().enumerate() {
            if let Some(mut row) = self.assembler.feature_row(rec)? {
                self.scaler.transform_row(&mut row)?;
                values.extend(row);
                kept.push(i);
            }
        }
        if kept.len() < records.len() {
            warn!(
                "{}/{} records have no usable features and get no prediction",
                records.len() - kept.len(),
                records.len()
            );
        }

        let mut out = vec![None; records.len()];
        if kept.is_empty() {
            return Ok(out);
        }
        let x = FeatureMatrix::from_vec(values, kept.len(), self.assembler.n_features())?;
        let preds = self.ensemble.predict_routed(&x)?;
        for (i, p) in kept.into_iter().zip(preds) {
            out[i] = Some(p);
        }
        Ok(out)
    }

    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let file = std::fs::File::create(path).map_err(|source| CcsPredError::Io {
            source,
            path: Some(path.to_path_buf()),
        })?;
        serde_json::to_writer(std::io::BufWriter::new(file), self)?;
        info!("Wrote model to {}", path.display());
        Ok(())
    }

    /// Reads a model written by [`TrainedModel::save_json`] and validates it.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| CcsPredError::Io {
            source,
            path: Some(path.to_path_buf()),
        })?;
        let model: Self = serde_json::from_reader(std::io::BufReader::new(file))?;
        model.validate().map_err(|e| match e {
            CcsPredError::InvalidModel { msg } => {
                CcsPredError::invalid_model(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;
        Ok(model)
    }
}

/// Everything a training run produces.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model: TrainedModel,
    pub summary: TrainTestSummary,
    pub grid_scores: Vec<GridScore>,
    pub best_cv_mse: f64,
    /// Metrics of the held-out rows of each source.
    pub test_per_source: Vec<SourceMetrics>,
    pub n_excluded: usize,
    pub n_missing_descriptors: usize,
    pub n_non_finite: usize,
}

/// Assemble, split, scale, grid-search and evaluate in one go.
#[cfg_attr(
    feature = "instrumentation",
    tracing::instrument(skip_all, level = "debug")
)]
pub fn train_pipeline(
    config: &PipelineConfig,
    records: &[CompoundRecord],
    show_progress: bool,
) -> Result<TrainingReport> {
    let start = Instant::now();
    config.validate()?;

    let assembler = FeatureAssembler::try_new(&config.feature_config())?;
    let assembled = assembler.assemble(records)?;
    info!(
        "Assembled {} rows x {} features ({} excluded)",
        assembled.len(),
        assembler.n_features(),
        assembled.n_excluded
    );

    let split = SplitData::from_assembled(
        &assembled,
        config.stratify_by()?,
        config.test_fraction,
        config.seed,
    )?;
    let mut test_rows = split.split.test.clone();
    test_rows.sort_unstable();
    let test_records = CombinedDataset::from_records(
        test_rows
            .iter()
            .map(|&i| records[assembled.record_indices[i]].clone()),
    );
    let scaled = ScaledData::from_split(split, config.zero_variance()?)?;

    let entries = expand_grid(&config.cluster_counts, &config.per_estimator_grid)?;
    let search = grid_search(
        &config.estimator()?,
        &scaled.x_train,
        &scaled.y_train,
        &entries,
        &config.grid_search_options(show_progress),
    )?;

    let pred_train = search.model.predict(&scaled.x_train)?;
    let pred_test = search.model.predict(&scaled.x_test)?;
    let summary = TrainTestSummary::compute(
        &scaled.y_train,
        &pred_train,
        &scaled.y_test,
        &pred_test,
        config.zero_target()?,
    )?;
    info!("train: {}", summary.train);
    info!("test: {}", summary.test);

    let model = TrainedModel {
        assembler,
        scaler: scaled.scaler,
        ensemble: search.model,
        configuration: search.best,
    };
    let test_per_source = evaluate_per_source(&model, &test_records, config.zero_target()?)?;
    info!("Training finished in {:?}", start.elapsed());

    Ok(TrainingReport {
        model,
        summary,
        grid_scores: search.scores,
        best_cv_mse: search.best_mse,
        test_per_source,
        n_excluded: assembled.n_excluded,
        n_missing_descriptors: assembled.n_missing_descriptors,
        n_non_finite: assembled.n_non_finite,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetrics {
    pub tag: String,
    pub n_records: usize,
    /// `None` when no record of the source could be predicted.
    pub metrics: Option<RegressionMetrics>,
}

/// Metrics of `model` on each source dataset separately, in source order.
///
/// `n_records` counts the records of the source as given, usable or not.
pub fn evaluate_per_source(
    model: &TrainedModel,
    dataset: &CombinedDataset,
    policy: ZeroTargetPolicy,
) -> Result<Vec<SourceMetrics>> {
    let mut out = Vec::with_capacity(dataset.sources.len());
    for source in dataset.sources.iter() {
        let assembled = match model.assembler.assemble(&source.records) {
            Ok(a) => a,
            Err(CcsPredError::DataProcessing(DataProcessingError::ExpectedNonEmptyData {
                ..
            })) => {
                warn!("Source {} has no usable records", source.tag);
                out.push(SourceMetrics {
                    tag: source.tag.clone(),
                    n_records: source.len(),
                    metrics: None,
                });
                continue;
            }
            Err(e) => return Err(e),
        };
        let preds = model.predict_matrix(&assembled.x)?;
        let metrics = compute_metrics(&assembled.y, &preds, policy)?;
        info!("{}: {}", source.tag, metrics);
        out.push(SourceMetrics {
            tag: source.tag.clone(),
            n_records: source.len(),
            metrics: Some(metrics),
        });
    }
    Ok(out)
}
