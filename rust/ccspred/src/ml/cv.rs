use indicatif::{
    ParallelProgressIterator,
    ProgressStyle,
};
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    warn,
};

use super::ensemble::{
    ClusterEnsemble,
    EnsembleOptions,
};
use super::estimator::{
    Estimator,
    check_xy,
};
use super::grid::{
    GridConfiguration,
    GridEntry,
};
use crate::errors::{
    CcsPredError,
    Result,
};
use crate::features::FeatureMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridSearchOptions {
    pub n_folds: usize,
    /// Seed handed to every k-means fit, in the folds and in the final refit.
    pub seed: u64,
    pub ensemble: EnsembleOptions,
    pub show_progress: bool,
    /// Upper bound on the number of configurations one search may evaluate.
    pub max_configurations: usize,
}

pub const DEFAULT_MAX_CONFIGURATIONS: usize = 10_000;

impl Default for GridSearchOptions {
    fn default() -> Self {
        Self {
            n_folds: 5,
            seed: 42,
            ensemble: EnsembleOptions::default(),
            show_progress: false,
            max_configurations: DEFAULT_MAX_CONFIGURATIONS,
        }
    }
}

/// Cross-validation outcome of one configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridScore {
    pub configuration: GridConfiguration,
    /// Mean of `fold_mse`, absent if any fold failed.
    pub mean_mse: Option<f64>,
    pub fold_mse: Vec<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GridSearchResult<E: Estimator> {
    pub best: GridConfiguration,
    pub best_mse: f64,
    /// One entry per evaluated configuration, in search-space order.
    pub scores: Vec<GridScore>,
    /// The best configuration refit on every row.
    pub model: ClusterEnsemble<E>,
}

/// Round-robin fold ids `0, 1, .., n_folds - 1, 0, 1, ..`.
///
/// The rows are expected to be shuffled already, which the stratified
/// splitter guarantees for its training set. Ordered input gives biased
/// folds.
pub fn assign_folds(n_rows: usize, n_folds: usize) -> Vec<usize> {
    (0..n_rows).map(|i| i % n_folds).collect()
}

fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> f64 {
    y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>()
        / y_true.len() as f64
}

/// Held-out mean squared error of `configuration` on every fold.
pub fn cross_validate<E: Estimator>(
    prototype: &E,
    x: &FeatureMatrix,
    y: &[f64],
    folds: &[usize],
    n_folds: usize,
    configuration: &GridConfiguration,
    options: &GridSearchOptions,
) -> Result<Vec<f64>> {
    (0..n_folds)
        .map(|fold| -> Result<f64> {
            let (train, test): (Vec<usize>, Vec<usize>) =
                (0..folds.len()).partition(|&i| folds[i] != fold);
            let y_train: Vec<f64> = train.iter().map(|&i| y[i]).collect();
            let y_test: Vec<f64> = test.iter().map(|&i| y[i]).collect();
            let model = ClusterEnsemble::new(prototype.clone()).fit(
                &x.select_rows(&train),
                &y_train,
                configuration.n_clusters,
                &configuration.per_cluster_params,
                options.seed,
                &options.ensemble,
            )?;
            let preds = model.predict(&x.select_rows(&test))?;
            Ok(mean_squared_error(&y_test, &preds))
        })
        .collect()
}

/// Exhaustive k-fold search over every configuration in `entries`.
///
/// The search space is counted before anything is materialized and a
/// space larger than `options.max_configurations` is refused.
///
/// Configurations are evaluated in parallel. One that fails in any fold
/// (an empty cluster, a singular system) is logged and recorded in the
/// scores, and the search carries on; only when every configuration fails
/// is the first failure returned. Ties on mean squared error keep the
/// configuration that comes first in the search space.
#[cfg_attr(
    feature = "instrumentation",
    tracing::instrument(skip_all, level = "debug")
)]
pub fn grid_search<E: Estimator>(
    prototype: &E,
    x: &FeatureMatrix,
    y: &[f64],
    entries: &[GridEntry],
    options: &GridSearchOptions,
) -> Result<GridSearchResult<E>> {
    check_xy(x, y, "grid_search")?;
    if options.n_folds < 2 || options.n_folds > x.nrows() {
        return Err(CcsPredError::config(
            "cv_folds",
            format!(
                "{} folds requested for {} rows, need 2 <= folds <= rows",
                options.n_folds,
                x.nrows()
            ),
        ));
    }

    let mut total: usize = 0;
    for entry in entries.iter() {
        total = entry
            .n_assignments()
            .and_then(|n| total.checked_add(n))
            .ok_or_else(|| {
                CcsPredError::config(
                    "per_estimator_grid",
                    format!(
                        "search space for k={} does not fit in memory",
                        entry.n_clusters()
                    ),
                )
            })?;
    }
    if total == 0 {
        return Err(CcsPredError::config(
            "cluster_counts",
            "the search space is empty",
        ));
    }
    if total > options.max_configurations {
        return Err(CcsPredError::config(
            "max_grid_configurations",
            format!(
                "search space holds {} configurations, the limit is {}",
                total, options.max_configurations
            ),
        ));
    }

    let configurations: Vec<GridConfiguration> =
        entries.iter().flat_map(|e| e.configurations()).collect();
    info!(
        "Grid search over {} configurations with {}-fold cross validation on {} rows",
        configurations.len(),
        options.n_folds,
        x.nrows()
    );

    let folds = assign_folds(x.nrows(), options.n_folds);
    let evaluate = |cfg: &GridConfiguration| {
        cross_validate(prototype, x, y, &folds, options.n_folds, cfg, options)
    };
    let outcomes: Vec<Result<Vec<f64>>> = if options.show_progress {
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        configurations
            .par_iter()
            .progress_with_style(style)
            .map(evaluate)
            .collect()
    } else {
        configurations.par_iter().map(evaluate).collect()
    };

    let mut scores = Vec::with_capacity(outcomes.len());
    let mut first_error: Option<CcsPredError> = None;
    let mut best: Option<(usize, f64)> = None;
    for (i, (cfg, outcome)) in configurations.iter().zip(outcomes).enumerate() {
        match outcome {
            Ok(fold_mse) => {
                let mean = fold_mse.iter().sum::<f64>() / fold_mse.len() as f64;
                debug!("{} -> mean mse {:.4}", cfg, mean);
                if best.is_none_or(|(_, b)| mean < b) {
                    best = Some((i, mean));
                }
                scores.push(GridScore {
                    configuration: cfg.clone(),
                    mean_mse: Some(mean),
                    fold_mse,
                    error: None,
                });
            }
            Err(e) => {
                warn!("Configuration {} failed: {}", cfg, e);
                scores.push(GridScore {
                    configuration: cfg.clone(),
                    mean_mse: None,
                    fold_mse: Vec::new(),
                    error: Some(e.to_string()),
                });
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    let (best_idx, best_mse) = match (best, first_error) {
        (Some(b), _) => b,
        (None, Some(e)) => return Err(e),
        (None, None) => {
            return Err(CcsPredError::config(
                "cluster_counts",
                "the search space is empty",
            ));
        }
    };
    let best_cfg = configurations[best_idx].clone();
    info!("Best configuration {} with mean mse {:.4}", best_cfg, best_mse);

    let model = ClusterEnsemble::new(prototype.clone()).fit(
        x,
        y,
        best_cfg.n_clusters,
        &best_cfg.per_cluster_params,
        options.seed,
        &options.ensemble,
    )?;

    Ok(GridSearchResult {
        best: best_cfg,
        best_mse,
        scores,
        model,
    })
}
