//! K-means partitioning of the feature space.
//!
//! Centroids are learned with `linfa-clustering`. Every consumer
//! (training-row partitioning, test-row routing and inference) goes through
//! [`KMeansRouter::assign`] or [`KMeansRouter::assign_with_distance`], so all
//! three see the same geometry.

use linfa::DatasetBase;
use linfa::traits::Fit;
use linfa_clustering::{
    KMeans,
    KMeansInit,
};
use ndarray::{
    Array1,
    Array2,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    warn,
};

use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};
use crate::features::FeatureMatrix;
use crate::features::matrix::squared_euclidean;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KMeansOptions {
    /// Iterations per initialization.
    pub max_iter: usize,
    /// Number of k-means++ initializations, the lowest inertia wins.
    pub n_init: usize,
    /// Relative convergence threshold. A run stops once the norm of the
    /// centroid shift drops below `sqrt(tol * mean feature variance)`.
    pub tol: f64,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        Self {
            max_iter: 300,
            n_init: 10,
            tol: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KMeansRouter {
    centroids: FeatureMatrix,
    inertia: f64,
    converged: bool,
}

/// Index of the nearest centroid and its squared distance, ties go to the
/// lowest index.
fn nearest(centroids: &FeatureMatrix, row: &[f64]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.rows().enumerate() {
        let d = squared_euclidean(row, c);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// Row ids of the first occurrence of every distinct row, in row order.
fn distinct_rows(x: &FeatureMatrix) -> Vec<usize> {
    let cmp_rows = |a: &usize, b: &usize| {
        x.row(*a)
            .iter()
            .zip(x.row(*b))
            .map(|(u, v)| u.total_cmp(v))
            .find(|o| o.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    };
    let mut order: Vec<usize> = (0..x.nrows()).collect();
    order.sort_by(|a, b| cmp_rows(a, b).then(a.cmp(b)));
    order.dedup_by(|a, b| cmp_rows(&*a, &*b).is_eq());
    order.sort_unstable();
    order
}

fn to_feature_matrix(centroids: &Array2<f64>) -> Result<FeatureMatrix> {
    FeatureMatrix::from_vec(
        centroids.iter().copied().collect(),
        centroids.nrows(),
        centroids.ncols(),
    )
}

fn centroid_shift(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(u, v)| (u - v) * (u - v))
        .sum::<f64>()
        .sqrt()
}

type Dataset = DatasetBase<Array2<f64>, Array1<()>>;

/// One assignment/update round starting from `init`.
fn kmeans_step(dataset: &Dataset, k: usize, seed: u64, init: KMeansInit<f64>) -> Result<Array2<f64>> {
    let model = KMeans::params_with_rng(k, ChaCha8Rng::seed_from_u64(seed))
        .n_runs(1)
        .max_n_iterations(1)
        .tolerance(f64::MAX)
        .init_method(init)
        .fit(dataset)
        .map_err(|e| CcsPredError::fit("k-means", e))?;
    Ok(model.centroids().clone())
}

impl KMeansRouter {
    /// Fits `k` centroids to the rows of `x`.
    ///
    /// The same matrix, `k`, `seed` and options always produce the same
    /// centroids. When `x` has fewer than `k` distinct rows the distinct
    /// rows become the centroids and the rest are duplicates that attract
    /// no rows; handling those empty clusters is left to the caller.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip_all, level = "debug")
    )]
    pub fn fit(x: &FeatureMatrix, k: usize, seed: u64, options: &KMeansOptions) -> Result<Self> {
        if k == 0 {
            return Err(CcsPredError::config("cluster_counts", "k must be >= 1"));
        }
        if options.max_iter == 0 || options.n_init == 0 {
            return Err(CcsPredError::config(
                "kmeans_max_iter",
                "max_iter and n_init must be >= 1",
            ));
        }
        if x.is_empty() {
            return Err(DataProcessingError::ExpectedNonEmptyData {
                context: Some("KMeansRouter::fit".to_string()),
            }
            .into());
        }

        let distinct = distinct_rows(x);
        if distinct.len() < k {
            warn!(
                "k-means with k={} on {} distinct rows, {} clusters will stay empty",
                k,
                distinct.len(),
                k - distinct.len()
            );
            let mut picks = distinct.clone();
            picks.resize(k, distinct[0]);
            return Ok(Self::from_centroids(x, x.select_rows(&picks), true));
        }

        let mean_variance = x
            .column_stats()
            .iter()
            .map(|s| s.variance().unwrap_or(0.0))
            .sum::<f64>()
            / x.ncols().max(1) as f64;
        let tolerance = (options.tol * mean_variance).sqrt().max(f64::MIN_POSITIVE);

        let dataset: Dataset = DatasetBase::from(x.to_ndarray()?);
        let fitted = KMeans::params_with_rng(k, ChaCha8Rng::seed_from_u64(seed))
            .n_runs(options.n_init)
            .max_n_iterations(options.max_iter as u64)
            .tolerance(tolerance)
            .init_method(KMeansInit::KMeansPlusPlus)
            .fit(&dataset);

        let (centroids, converged) = match fitted {
            Ok(model) => {
                let centroids = model.centroids().clone();
                // One more round tells whether the run stopped at a fixed
                // point or at the iteration cap.
                let next = kmeans_step(
                    &dataset,
                    k,
                    seed,
                    KMeansInit::Precomputed(centroids.clone()),
                )?;
                let shift = centroid_shift(&centroids, &next);
                debug!("k-means k={} residual centroid shift {:.3e}", k, shift);
                (centroids, shift < tolerance)
            }
            Err(e) => {
                warn!(
                    "k-means with k={} failed to fit ({}), iterating from a single k-means++ seeding",
                    k, e
                );
                let mut centroids = kmeans_step(&dataset, k, seed, KMeansInit::KMeansPlusPlus)?;
                let mut converged = false;
                for _ in 1..options.max_iter {
                    let next = kmeans_step(
                        &dataset,
                        k,
                        seed,
                        KMeansInit::Precomputed(centroids.clone()),
                    )?;
                    converged = centroid_shift(&centroids, &next) < tolerance;
                    centroids = next;
                    if converged {
                        break;
                    }
                }
                (centroids, converged)
            }
        };

        if !converged {
            warn!(
                "k-means with k={} did not converge within {} iterations, using last centroids",
                k, options.max_iter
            );
        }
        Ok(Self::from_centroids(x, to_feature_matrix(&centroids)?, converged))
    }

    fn from_centroids(x: &FeatureMatrix, centroids: FeatureMatrix, converged: bool) -> Self {
        let distances: Vec<f64> = x
            .as_slice()
            .par_chunks(x.ncols().max(1))
            .map(|row| nearest(&centroids, row).1)
            .collect();
        Self {
            centroids,
            inertia: distances.iter().sum(),
            converged,
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.centroids.ncols()
    }

    pub fn centroids(&self) -> &FeatureMatrix {
        &self.centroids
    }

    /// Sum of squared distances of the training rows to their centroid.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    fn check_row(&self, row: &[f64], context: &str) -> Result<()> {
        if row.len() != self.n_features() {
            return Err(CcsPredError::dimension_mismatch(
                self.n_features(),
                row.len(),
                context,
            ));
        }
        Ok(())
    }

    /// Cluster id of the centroid nearest to `row`.
    pub fn assign(&self, row: &[f64]) -> Result<usize> {
        self.check_row(row, "KMeansRouter::assign")?;
        Ok(nearest(&self.centroids, row).0)
    }

    /// Cluster id and Euclidean distance to that cluster's centroid.
    pub fn assign_with_distance(&self, row: &[f64]) -> Result<(usize, f64)> {
        self.check_row(row, "KMeansRouter::assign_with_distance")?;
        let (cluster, sq) = nearest(&self.centroids, row);
        Ok((cluster, sq.sqrt()))
    }

    pub fn assign_all(&self, x: &FeatureMatrix) -> Result<Vec<usize>> {
        x.check_ncols(self.n_features(), "KMeansRouter::assign_all")?;
        Ok(x
            .as_slice()
            .par_chunks(x.ncols().max(1))
            .map(|row| nearest(&self.centroids, row).0)
            .collect())
    }

    pub fn assign_all_with_distance(&self, x: &FeatureMatrix) -> Result<Vec<(usize, f64)>> {
        x.check_ncols(self.n_features(), "KMeansRouter::assign_all_with_distance")?;
        Ok(x
            .as_slice()
            .par_chunks(x.ncols().max(1))
            .map(|row| {
                let (cluster, sq) = nearest(&self.centroids, row);
                (cluster, sq.sqrt())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn blobs(seed: u64) -> FeatureMatrix {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let centers = [[0.0, 0.0], [10.0, 10.0], [-10.0, 10.0]];
        let rows: Vec<Vec<f64>> = (0..150)
            .map(|i| {
                let c = centers[i % 3];
                vec![c[0] + rng.gen_range(-1.0..1.0), c[1] + rng.gen_range(-1.0..1.0)]
            })
            .collect();
        FeatureMatrix::from_rows(&rows).unwrap()
    }

    #[test]
    fn test_same_seed_same_centroids() {
        let x = blobs(7);
        let opts = KMeansOptions::default();
        let a = KMeansRouter::fit(&x, 3, 42, &opts).unwrap();
        let b = KMeansRouter::fit(&x, 3, 42, &opts).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.assign_all(&x).unwrap(), b.assign_all(&x).unwrap());
    }

    #[test]
    fn test_recovers_separated_blobs() {
        let x = blobs(11);
        let router = KMeansRouter::fit(&x, 3, 0, &KMeansOptions::default()).unwrap();
        assert!(router.converged());
        let labels = router.assign_all(&x).unwrap();
        // Rows generated from the same center share a label.
        for i in 3..labels.len() {
            assert_eq!(labels[i], labels[i % 3]);
        }
        let mut distinct = vec![labels[0], labels[1], labels[2]];
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_single_cluster_is_column_mean() {
        let x = FeatureMatrix::from_rows(&[vec![1.0, 0.0], vec![3.0, 4.0]]).unwrap();
        let router = KMeansRouter::fit(&x, 1, 1, &KMeansOptions::default()).unwrap();
        let c = router.centroids().row(0);
        assert!((c[0] - 2.0).abs() < 0.05, "{:?}", c);
        assert!((c[1] - 2.0).abs() < 0.05, "{:?}", c);
        assert_eq!(router.assign(&[100.0, -5.0]).unwrap(), 0);
    }

    #[test]
    fn test_more_clusters_than_distinct_rows() {
        let x = FeatureMatrix::from_rows(&[vec![2.0], vec![1.0], vec![2.0], vec![1.0]]).unwrap();
        let router = KMeansRouter::fit(&x, 3, 5, &KMeansOptions::default()).unwrap();
        assert_eq!(router.n_clusters(), 3);
        assert_eq!(router.centroids().as_slice(), &[2.0, 1.0, 2.0]);
        assert_eq!(router.inertia(), 0.0);
        let labels = router.assign_all(&x).unwrap();
        assert_eq!(labels, vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let rows: Vec<Vec<f64>> = (0..200).map(|i| vec![(i * i % 197) as f64]).collect();
        let x = FeatureMatrix::from_rows(&rows).unwrap();
        let options = KMeansOptions {
            max_iter: 1,
            n_init: 1,
            tol: 1e-12,
        };
        let router = KMeansRouter::fit(&x, 4, 3, &options).unwrap();
        assert!(!router.converged());
        assert_eq!(router.n_clusters(), 4);
        assert_eq!(router.assign_all(&x).unwrap().len(), 200);
    }

    #[test]
    fn test_training_distances_add_up_to_inertia() {
        let x = blobs(5);
        let router = KMeansRouter::fit(&x, 3, 9, &KMeansOptions::default()).unwrap();
        let routed = router.assign_all_with_distance(&x).unwrap();
        let labels = router.assign_all(&x).unwrap();
        let total: f64 = routed.iter().map(|(_, d)| d * d).sum();
        assert!((total - router.inertia()).abs() < 1e-9 * router.inertia().max(1.0));
        for (i, (cluster, d)) in routed.iter().enumerate() {
            assert_eq!(*cluster, labels[i]);
            let direct = squared_euclidean(x.row(i), router.centroids().row(*cluster)).sqrt();
            assert!((d - direct).abs() < 1e-12);
            assert_eq!(router.assign_with_distance(x.row(i)).unwrap(), (*cluster, *d));
        }
    }

    #[test]
    fn test_assign_checks_width() {
        let x = blobs(3);
        let router = KMeansRouter::fit(&x, 2, 0, &KMeansOptions::default()).unwrap();
        assert!(matches!(
            router.assign(&[1.0, 2.0, 3.0]),
            Err(CcsPredError::DataProcessing(
                DataProcessingError::DimensionMismatch { .. }
            ))
        ));
        assert!(router.assign_with_distance(&[1.0]).is_err());
        assert!(KMeansRouter::fit(&x, 0, 0, &KMeansOptions::default()).is_err());
    }
}
