//! Hyperparameter search space for cluster-routed ensembles.
//!
//! For a cluster count `K` every cluster independently picks one of the `C`
//! single-estimator combinations of the per-estimator grid, so the search
//! space for that `K` holds `C^K` assignments. Nothing here caps that
//! growth; [`GridEntry::n_assignments`] counts it without iterating and
//! the grid search refuses spaces above its configured maximum.
//!
//! ```text
//! per-estimator grid  {gamma: [0.1, 1.0]}          C = 2
//! K = 2               [{0.1}, {0.1}]  [{0.1}, {1.0}]
//!                     [{1.0}, {0.1}]  [{1.0}, {1.0}]   C^K = 4
//! ```

use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

use super::params::{
    EstimatorParams,
    ParamValue,
};
use crate::errors::{
    CcsPredError,
    Result,
};

/// Candidate values per parameter name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGrid(BTreeMap<String, Vec<ParamValue>>);

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<V: Into<ParamValue>>(mut self, name: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.0
            .insert(name.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.keys().map(|k| k.as_str())
    }

    pub fn validate(&self) -> Result<()> {
        match self.0.iter().find(|(_, v)| v.is_empty()) {
            Some((name, _)) => Err(CcsPredError::config(
                "per_estimator_grid",
                format!("no candidate values for '{}'", name),
            )),
            None => Ok(()),
        }
    }

    /// Every single-estimator combination; the last parameter name (in
    /// sorted order) varies fastest. An empty grid yields one empty
    /// combination.
    pub fn combinations(&self) -> Result<Vec<EstimatorParams>> {
        self.validate()?;
        let mut out = vec![EstimatorParams::new()];
        for (name, values) in self.0.iter() {
            out = out
                .into_iter()
                .flat_map(|partial| {
                    values.iter().map(move |v| {
                        let mut next = partial.clone();
                        next.insert(name.clone(), v.clone());
                        next
                    })
                })
                .collect();
        }
        Ok(out)
    }
}

/// One concrete point of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfiguration {
    pub n_clusters: usize,
    /// Entry `i` configures the estimator of cluster `i`.
    pub per_cluster_params: Vec<EstimatorParams>,
}

impl std::fmt::Display for GridConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "k={} [", self.n_clusters)?;
        for (i, p) in self.per_cluster_params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, "]")
    }
}

/// The search space for a single cluster count.
#[derive(Debug, Clone, PartialEq)]
pub struct GridEntry {
    n_clusters: usize,
    combinations: Vec<EstimatorParams>,
}

impl GridEntry {
    pub fn n_clusters(&self) -> usize {
        self.n_clusters
    }

    pub fn combinations(&self) -> &[EstimatorParams] {
        &self.combinations
    }

    /// `C^K`, or `None` if it does not fit in a `usize`.
    pub fn n_assignments(&self) -> Option<usize> {
        u32::try_from(self.n_clusters)
            .ok()
            .and_then(|k| self.combinations.len().checked_pow(k))
    }

    /// Lazily walks all `C^K` assignments, the last cluster varying fastest.
    pub fn assignments(&self) -> ClusterAssignments<'_> {
        ClusterAssignments {
            combinations: &self.combinations,
            digits: vec![0; self.n_clusters],
            done: self.combinations.is_empty() || self.n_clusters == 0,
        }
    }

    pub fn configurations(&self) -> impl Iterator<Item = GridConfiguration> + '_ {
        self.assignments().map(|per_cluster_params| GridConfiguration {
            n_clusters: self.n_clusters,
            per_cluster_params,
        })
    }
}

pub struct ClusterAssignments<'a> {
    combinations: &'a [EstimatorParams],
    digits: Vec<usize>,
    done: bool,
}

impl Iterator for ClusterAssignments<'_> {
    type Item = Vec<EstimatorParams>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let current = self
            .digits
            .iter()
            .map(|&d| self.combinations[d].clone())
            .collect();

        // Odometer increment.
        let base = self.combinations.len();
        let mut pos = self.digits.len();
        loop {
            if pos == 0 {
                self.done = true;
                break;
            }
            pos -= 1;
            self.digits[pos] += 1;
            if self.digits[pos] < base {
                break;
            }
            self.digits[pos] = 0;
        }
        Some(current)
    }
}

/// One [`GridEntry`] per candidate cluster count, in the given order.
pub fn expand_grid(cluster_counts: &[usize], grid: &ParameterGrid) -> Result<Vec<GridEntry>> {
    if cluster_counts.is_empty() {
        return Err(CcsPredError::config(
            "cluster_counts",
            "at least one cluster count is required",
        ));
    }
    if let Some(k) = cluster_counts.iter().find(|&&k| k == 0) {
        return Err(CcsPredError::config(
            "cluster_counts",
            format!("cluster count {} must be >= 1", k),
        ));
    }
    let combinations = grid.combinations()?;
    Ok(cluster_counts
        .iter()
        .map(|&n_clusters| GridEntry {
            n_clusters,
            combinations: combinations.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_count_is_c_to_the_k() {
        let grid = ParameterGrid::new()
            .with("alpha", [0.1, 1.0, 10.0])
            .with("fit_intercept", [true, false]);
        let entries = expand_grid(&[1, 2, 3], &grid).unwrap();
        for entry in entries.iter() {
            let c: usize = 6;
            let expected = c.pow(entry.n_clusters() as u32);
            assert_eq!(entry.n_assignments(), Some(expected));
            assert_eq!(entry.assignments().count(), expected);
            assert!(entry
                .assignments()
                .all(|a| a.len() == entry.n_clusters()));
        }
    }

    #[test]
    fn test_assignment_order() {
        let grid = ParameterGrid::new().with("gamma", [0.1, 1.0]);
        let entries = expand_grid(&[2], &grid).unwrap();
        let got: Vec<Vec<f64>> = entries[0]
            .assignments()
            .map(|a| a.iter().map(|p| p.get_f64("gamma").unwrap().unwrap()).collect())
            .collect();
        assert_eq!(
            got,
            vec![vec![0.1, 0.1], vec![0.1, 1.0], vec![1.0, 0.1], vec![1.0, 1.0]]
        );
    }

    #[test]
    fn test_empty_grid_has_one_combination() {
        let entries = expand_grid(&[3], &ParameterGrid::new()).unwrap();
        assert_eq!(entries[0].n_assignments(), Some(1));
        let all: Vec<_> = entries[0].configurations().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].per_cluster_params.len(), 3);
    }

    #[test]
    fn test_invalid_inputs() {
        let empty_values = ParameterGrid::new().with("alpha", Vec::<f64>::new());
        assert!(expand_grid(&[1], &empty_values).is_err());
        assert!(expand_grid(&[], &ParameterGrid::new()).is_err());
        assert!(expand_grid(&[2, 0], &ParameterGrid::new()).is_err());
    }

    #[test]
    fn test_overflow_is_reported() {
        let grid = ParameterGrid::new().with("alpha", (0..1000).map(|i| i as i64));
        let entries = expand_grid(&[50], &grid).unwrap();
        assert_eq!(entries[0].n_assignments(), None);
    }
}
