//! Stratified train/test splitting.
//!
//! Rows are grouped by a discrete stratification key (the source dataset
//! tag, or a coarse binning of the continuous target), and every stratum
//! contributes to the test set in proportion to its size.

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{
    debug,
    info,
};

use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};
use crate::features::{
    AssembledData,
    FeatureLayout,
    FeatureMatrix,
};
use crate::utils::summary_stats::percentile_sorted;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StratifyBy {
    /// Raw source-dataset tag.
    Source,
    /// Six quartile-derived bins of the target.
    TargetBins,
}

impl FromStr for StratifyBy {
    type Err = CcsPredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(Self::Source),
            "target_bins" | "ccs" => Ok(Self::TargetBins),
            other => Err(CcsPredError::config(
                "stratify_by",
                format!("'{}' is not one of 'source', 'target_bins'", other),
            )),
        }
    }
}

/// Bin boundaries `[Q1, M12, Q2, M23, Q3]` of the target distribution.
///
/// ```text
///         Q1            Q2             Q3
///         |             |              |
///   bin0  | bin1 | bin2 | bin3 | bin4  | bin5
///                |             |
///              M12            M23
/// ```
pub fn target_bin_bounds(y: &[f64]) -> Option<[f64; 5]> {
    let mut sorted = y.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    let q1 = percentile_sorted(&sorted, 25.0)?;
    let q2 = percentile_sorted(&sorted, 50.0)?;
    let q3 = percentile_sorted(&sorted, 75.0)?;
    let m12 = q1 + (q2 - q1) / 2.0;
    let m23 = q2 + (q3 - q2) / 2.0;
    Some([q1, m12, q2, m23, q3])
}

/// Bin index in `0..=5` of every target value.
///
/// A value lands in bin `i` when `bounds[i - 1] <= v < bounds[i]`, so when
/// all the bounds collapse to one point every row shares a single bin.
pub fn target_bins(y: &[f64]) -> Vec<usize> {
    match target_bin_bounds(y) {
        Some(bounds) => y
            .iter()
            .map(|v| bounds.iter().filter(|&&b| b <= *v).count())
            .collect(),
        None => Vec::new(),
    }
}

/// Dense stratum ids for categorical labels (sorted label order).
pub fn strata_from_labels<S: AsRef<str>>(labels: &[S]) -> Vec<usize> {
    let mut ids: BTreeMap<&str, usize> = BTreeMap::new();
    labels.iter().for_each(|l| {
        ids.insert(l.as_ref(), 0);
    });
    ids.values_mut()
        .enumerate()
        .for_each(|(i, v)| *v = i);
    labels.iter().map(|l| ids[l.as_ref()]).collect()
}

/// Disjoint train/test row indices covering every row exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Split {
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_test_fraction(test_fraction: f64) -> Result<()> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(CcsPredError::config(
            "test_fraction",
            format!("{} is not in (0, 1)", test_fraction),
        ));
    }
    Ok(())
}

/// Shuffled stratified split of `strata.len()` rows.
///
/// The test set holds `round(n * test_fraction)` rows; each stratum gets
/// the floor of its proportional share and the leftover rows go to the
/// strata with the largest remainders. Fully determined by `seed`.
pub fn stratified_split(strata: &[usize], test_fraction: f64, seed: u64) -> Result<Split> {
    check_test_fraction(test_fraction)?;
    let n = strata.len();
    let n_test = (n as f64 * test_fraction).round() as usize;
    if n_test == 0 || n_test >= n {
        return Err(CcsPredError::config(
            "test_fraction",
            format!(
                "{} of {} rows leaves an empty train or test set",
                test_fraction, n
            ),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &stratum) in strata.iter().enumerate() {
        groups.entry(stratum).or_default().push(row);
    }
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();

    // Proportional allocation, largest remainder first.
    let mut alloc: Vec<(usize, f64)> = groups
        .iter()
        .map(|g| {
            let exact = g.len() as f64 * n_test as f64 / n as f64;
            let floor = exact.floor() as usize;
            (floor, exact - floor as f64)
        })
        .collect();
    let mut leftover = n_test - alloc.iter().map(|(f, _)| f).sum::<usize>();
    let mut order: Vec<usize> = (0..groups.len()).collect();
    // Shuffle first so ties between equal remainders are broken by the seed.
    order.shuffle(&mut rng);
    order.sort_by(|&a, &b| alloc[b].1.total_cmp(&alloc[a].1));
    for &g in order.iter() {
        if leftover == 0 {
            break;
        }
        if alloc[g].0 < groups[g].len() {
            alloc[g].0 += 1;
            leftover -= 1;
        }
    }

    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (group, (take, _)) in groups.iter_mut().zip(alloc.iter()) {
        group.shuffle(&mut rng);
        test.extend_from_slice(&group[..*take]);
        train.extend_from_slice(&group[*take..]);
    }
    train.shuffle(&mut rng);
    test.shuffle(&mut rng);

    debug!(
        "Stratified split over {} strata: {} train / {} test",
        groups.len(),
        train.len(),
        test.len()
    );
    Ok(Split { train, test })
}

/// Output of the split stage.
#[derive(Debug, Clone)]
pub struct SplitData {
    pub x_train: FeatureMatrix,
    pub y_train: Vec<f64>,
    pub x_test: FeatureMatrix,
    pub y_test: Vec<f64>,
    pub split: Split,
    pub layout: FeatureLayout,
}

impl SplitData {
    pub fn from_assembled(
        data: &AssembledData,
        stratify_by: StratifyBy,
        test_fraction: f64,
        seed: u64,
    ) -> Result<Self> {
        if data.is_empty() {
            return Err(CcsPredError::State {
                operation: "SplitData::from_assembled",
                requires: "FeatureAssembler::assemble producing at least one row",
            });
        }
        if data.x.nrows() != data.y.len() {
            return Err(DataProcessingError::ExpectedSlicesSameLength {
                expected: data.x.nrows(),
                other: data.y.len(),
                context: "SplitData::from_assembled".to_string(),
            }
            .into());
        }

        let strata = match stratify_by {
            StratifyBy::Source => strata_from_labels(&data.src_tags),
            StratifyBy::TargetBins => target_bins(&data.y),
        };
        let split = stratified_split(&strata, test_fraction, seed)?;
        info!(
            "Split {} rows into {} train / {} test (stratified by {:?})",
            data.len(),
            split.train.len(),
            split.test.len(),
            stratify_by
        );

        Ok(Self {
            x_train: data.x.select_rows(&split.train),
            y_train: split.train.iter().map(|&i| data.y[i]).collect(),
            x_test: data.x.select_rows(&split.test),
            y_test: split.test.iter().map(|&i| data.y[i]).collect(),
            split,
            layout: data.layout.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proportions(strata: &[usize], rows: &[usize], n_strata: usize) -> Vec<f64> {
        let mut counts = vec![0usize; n_strata];
        rows.iter().for_each(|&r| counts[strata[r]] += 1);
        counts
            .iter()
            .map(|&c| c as f64 / rows.len() as f64)
            .collect()
    }

    #[test]
    fn test_split_covers_all_rows_disjointly() {
        let strata: Vec<usize> = (0..503).map(|i| i % 4).collect();
        let split = stratified_split(&strata, 0.2, 7).unwrap();
        assert_eq!(split.test.len(), 101);
        let mut all: Vec<usize> = split.train.iter().chain(split.test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..503).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_preserves_proportions() {
        // Unbalanced strata: 400 / 250 / 100 / 30 rows
        let mut strata = Vec::new();
        for (s, n) in [(0usize, 400usize), (1, 250), (2, 100), (3, 30)] {
            strata.extend(std::iter::repeat(s).take(n));
        }
        let split = stratified_split(&strata, 0.25, 42).unwrap();
        let p_train = proportions(&strata, &split.train, 4);
        let p_test = proportions(&strata, &split.test, 4);
        for (a, b) in p_train.iter().zip(p_test.iter()) {
            assert!((a - b).abs() < 0.05, "{:?} vs {:?}", p_train, p_test);
        }
    }

    #[test]
    fn test_split_is_reproducible() {
        let strata: Vec<usize> = (0..200).map(|i| i % 3).collect();
        let a = stratified_split(&strata, 0.3, 11).unwrap();
        let b = stratified_split(&strata, 0.3, 11).unwrap();
        let c = stratified_split(&strata, 0.3, 12).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_bad_fraction() {
        let strata = vec![0; 10];
        assert!(stratified_split(&strata, 0.0, 1).is_err());
        assert!(stratified_split(&strata, 1.0, 1).is_err());
        assert!(stratified_split(&strata, 0.01, 1).is_err());
    }

    #[test]
    fn test_unknown_stratify_mode() {
        assert!(matches!(
            "adduct".parse::<StratifyBy>(),
            Err(CcsPredError::Configuration {
                key: "stratify_by",
                ..
            })
        ));
        assert_eq!("target_bins".parse::<StratifyBy>().unwrap(), StratifyBy::TargetBins);
    }

    #[test]
    fn test_target_bins() {
        let y: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let bins = target_bins(&y);
        assert_eq!(bins[0], 0);
        assert_eq!(bins[99], 5);
        assert!(bins.iter().all(|&b| b <= 5));
        let bounds = target_bin_bounds(&y).unwrap();
        assert!(bounds.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_constant_target_collapses_to_one_stratum() {
        let y = vec![180.0; 50];
        let bins = target_bins(&y);
        assert!(bins.iter().all(|&b| b == bins[0]));
        let split = stratified_split(&bins, 0.2, 3).unwrap();
        assert_eq!(split.test.len(), 10);
        assert_eq!(split.train.len(), 40);
    }

    #[test]
    fn test_strata_from_labels() {
        let ids = strata_from_labels(&["b", "a", "b", "c"]);
        assert_eq!(ids, vec![1, 0, 1, 2]);
    }

    #[test]
    fn test_from_assembled_rejects_empty_data() {
        let data = AssembledData {
            x: FeatureMatrix::zeros(0, 3),
            y: Vec::new(),
            names: Vec::new(),
            adducts: Vec::new(),
            src_tags: Vec::new(),
            layout: FeatureLayout {
                columns: vec!["mz".to_string(), "mqn_0".to_string(), "mqn_1".to_string()],
            },
            record_indices: Vec::new(),
            n_excluded: 4,
            n_missing_descriptors: 4,
            n_non_finite: 0,
        };
        assert!(matches!(
            SplitData::from_assembled(&data, StratifyBy::Source, 0.2, 1),
            Err(CcsPredError::State {
                operation: "SplitData::from_assembled",
                ..
            })
        ));
    }
}
