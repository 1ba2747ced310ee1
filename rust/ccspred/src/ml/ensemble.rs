use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

use super::cluster::{
    KMeansOptions,
    KMeansRouter,
};
use super::estimator::{
    Estimator,
    FittedEstimator,
    check_xy,
};
use super::params::EstimatorParams;
use crate::errors::{
    CcsPredError,
    Result,
};
use crate::features::FeatureMatrix;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleOptions {
    pub kmeans: KMeansOptions,
    /// Smallest number of training rows a cluster may hold.
    pub min_cluster_size: usize,
}

impl Default for EnsembleOptions {
    fn default() -> Self {
        Self {
            kmeans: KMeansOptions::default(),
            min_cluster_size: 1,
        }
    }
}

/// A prediction together with the cluster that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoutedPrediction {
    pub value: f64,
    pub cluster: usize,
    /// Euclidean distance, in scaled feature space, to the cluster centroid.
    pub centroid_distance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
enum EnsembleState<F> {
    Unfit,
    Fitted {
        router: KMeansRouter,
        estimators: Vec<F>,
        cluster_params: Vec<EstimatorParams>,
        cluster_sizes: Vec<usize>,
    },
}

/// Routes each row to its nearest k-means cluster and predicts with the
/// regressor fit on that cluster's training rows.
///
/// `fit` consumes an unfit ensemble and returns a fitted one. A fitted
/// ensemble refuses to be fit again; build a new one instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(
    serialize = "E: Serialize, E::Fitted: Serialize",
    deserialize = "E: Deserialize<'de>, E::Fitted: Deserialize<'de>"
))]
pub struct ClusterEnsemble<E: Estimator> {
    prototype: E,
    state: EnsembleState<E::Fitted>,
}

impl<E: Estimator> ClusterEnsemble<E> {
    pub fn new(prototype: E) -> Self {
        Self {
            prototype,
            state: EnsembleState::Unfit,
        }
    }

    pub fn prototype(&self) -> &E {
        &self.prototype
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self.state, EnsembleState::Fitted { .. })
    }

    /// Fits `k` clusters on `x` and one estimator per cluster.
    ///
    /// `per_cluster_params[i]` configures the estimator of cluster `i`, so
    /// its length must be `k`.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "debug")
    )]
    pub fn fit(
        self,
        x: &FeatureMatrix,
        y: &[f64],
        k: usize,
        per_cluster_params: &[EstimatorParams],
        seed: u64,
        options: &EnsembleOptions,
    ) -> Result<Self> {
        if self.is_fitted() {
            return Err(CcsPredError::State {
                operation: "ClusterEnsemble::fit",
                requires: "an unfit ensemble",
            });
        }
        check_xy(x, y, "ClusterEnsemble::fit")?;
        if per_cluster_params.len() != k {
            return Err(CcsPredError::config(
                "per_estimator_grid",
                format!(
                    "got {} parameter sets for {} clusters",
                    per_cluster_params.len(),
                    k
                ),
            ));
        }
        let configured: Vec<E> = per_cluster_params
            .iter()
            .map(|p| self.prototype.with_params(p))
            .collect::<Result<_>>()?;

        let router = KMeansRouter::fit(x, k, seed, &options.kmeans)?;
        let labels = router.assign_all(x)?;

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (row, &label) in labels.iter().enumerate() {
            members[label].push(row);
        }
        for (cluster, rows) in members.iter().enumerate() {
            if rows.is_empty() {
                return Err(CcsPredError::EmptyCluster {
                    cluster,
                    n_clusters: k,
                });
            }
            if rows.len() < options.min_cluster_size {
                return Err(CcsPredError::UndersizedCluster {
                    cluster,
                    size: rows.len(),
                    min_size: options.min_cluster_size,
                });
            }
        }

        let estimators: Vec<E::Fitted> = configured
            .par_iter()
            .zip(members.par_iter())
            .map(|(est, rows)| {
                let cluster_x = x.select_rows(rows);
                let cluster_y: Vec<f64> = rows.iter().map(|&i| y[i]).collect();
                est.fit(&cluster_x, &cluster_y)
            })
            .collect::<Result<_>>()?;

        let cluster_sizes: Vec<usize> = members.iter().map(|m| m.len()).collect();
        info!(
            "Fit {} ensemble with k={} on {} rows, cluster sizes {:?}",
            self.prototype.name(),
            k,
            x.nrows(),
            cluster_sizes
        );

        Ok(Self {
            prototype: self.prototype,
            state: EnsembleState::Fitted {
                router,
                estimators,
                cluster_params: per_cluster_params.to_vec(),
                cluster_sizes,
            },
        })
    }

    fn fitted(
        &self,
        operation: &'static str,
    ) -> Result<(&KMeansRouter, &[E::Fitted], &[EstimatorParams], &[usize])> {
        match &self.state {
            EnsembleState::Fitted {
                router,
                estimators,
                cluster_params,
                cluster_sizes,
            } => Ok((router, estimators, cluster_params, cluster_sizes)),
            EnsembleState::Unfit => Err(CcsPredError::State {
                operation,
                requires: "ClusterEnsemble::fit",
            }),
        }
    }

    pub fn router(&self) -> Result<&KMeansRouter> {
        Ok(self.fitted("ClusterEnsemble::router")?.0)
    }

    pub fn estimators(&self) -> Result<&[E::Fitted]> {
        Ok(self.fitted("ClusterEnsemble::estimators")?.1)
    }

    pub fn cluster_params(&self) -> Result<&[EstimatorParams]> {
        Ok(self.fitted("ClusterEnsemble::cluster_params")?.2)
    }

    /// Training rows per cluster, summing to the training set size.
    pub fn cluster_sizes(&self) -> Result<&[usize]> {
        Ok(self.fitted("ClusterEnsemble::cluster_sizes")?.3)
    }

    pub fn n_features(&self) -> Result<usize> {
        Ok(self.fitted("ClusterEnsemble::n_features")?.0.n_features())
    }

    /// Checks a deserialized ensemble: one estimator, parameter set and
    /// size per cluster, and a single feature width throughout.
    pub fn validate(&self) -> Result<()> {
        let (router, estimators, cluster_params, cluster_sizes) =
            self.fitted("ClusterEnsemble::validate")?;
        let k = router.n_clusters();
        for (what, len) in [
            ("estimators", estimators.len()),
            ("cluster_params", cluster_params.len()),
            ("cluster_sizes", cluster_sizes.len()),
        ] {
            if len != k {
                return Err(CcsPredError::invalid_model(format!(
                    "{} {} for {} clusters",
                    len, what, k
                )));
            }
        }
        if let Some((cluster, est)) = estimators
            .iter()
            .enumerate()
            .find(|(_, e)| e.n_features() != router.n_features())
        {
            return Err(CcsPredError::invalid_model(format!(
                "estimator of cluster {} expects {} features, the router {}",
                cluster,
                est.n_features(),
                router.n_features()
            )));
        }
        Ok(())
    }

    /// Predictions in input row order; every row is routed independently.
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        Ok(self
            .predict_routed(x)?
            .into_iter()
            .map(|p| p.value)
            .collect())
    }

    /// Like [`ClusterEnsemble::predict`], keeping the routing of every row.
    pub fn predict_routed(&self, x: &FeatureMatrix) -> Result<Vec<RoutedPrediction>> {
        let (router, estimators, _, _) = self.fitted("ClusterEnsemble::predict")?;
        x.check_ncols(router.n_features(), "ClusterEnsemble::predict")?;
        if x.is_empty() {
            return Ok(Vec::new());
        }
        x.as_slice()
            .par_chunks(x.ncols())
            .map(|row| -> Result<RoutedPrediction> {
                let (cluster, centroid_distance) = router.assign_with_distance(row)?;
                let estimator = estimators.get(cluster).ok_or_else(|| {
                    CcsPredError::invalid_model(format!(
                        "no estimator for cluster {} of {}",
                        cluster,
                        estimators.len()
                    ))
                })?;
                Ok(RoutedPrediction {
                    value: estimator.predict_row(row),
                    cluster,
                    centroid_distance,
                })
            })
            .collect()
    }
}
