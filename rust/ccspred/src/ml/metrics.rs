//! Regression metrics for predicted CCS values.
//!
//! Relative error of a row is `100 * |pred - true| / |true|` (percent). The
//! cumulative error distribution histograms those errors into 1%-wide bins
//! over `[0, 100]` (last bin closed), so rows above 100% are not counted in
//! its denominator.

use serde::{
    Deserialize,
    Serialize,
};
use std::str::FromStr;

use crate::errors::{
    CcsPredError,
    DataProcessingError,
    Result,
};
use crate::utils::summary_stats::{
    mean,
    median,
};

/// Handling of rows whose true value is exactly zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZeroTargetPolicy {
    /// Fail with [`CcsPredError::ZeroTarget`] naming the first such row.
    #[default]
    Error,
    /// Leave those rows out of the relative metrics only.
    SkipRow,
}

impl FromStr for ZeroTargetPolicy {
    type Err = CcsPredError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "error" => Ok(Self::Error),
            "skip_row" => Ok(Self::SkipRow),
            other => Err(CcsPredError::config(
                "zero_target",
                format!("'{}' is not one of 'error', 'skip_row'", other),
            )),
        }
    }
}

/// Percent of rows within 1, 3, 5 and 10 % relative error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CumulativeError {
    pub within_1: f64,
    pub within_3: f64,
    pub within_5: f64,
    pub within_10: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub n_rows: usize,
    pub r2: f64,
    pub mae: f64,
    pub mdae: f64,
    /// Mean relative error, percent.
    pub mre: f64,
    /// Median relative error, percent.
    pub mdre: f64,
    pub rmse: f64,
    pub cumulative_error: CumulativeError,
    /// Rows left out of the relative metrics under [`ZeroTargetPolicy::SkipRow`].
    pub n_zero_targets_skipped: usize,
}

impl std::fmt::Display for RegressionMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} R2={:.4} MAE={:.3} MDAE={:.3} MRE={:.3}% MDRE={:.3}% RMSE={:.3} CE<1/3/5/10%={:.1}/{:.1}/{:.1}/{:.1}",
            self.n_rows,
            self.r2,
            self.mae,
            self.mdae,
            self.mre,
            self.mdre,
            self.rmse,
            self.cumulative_error.within_1,
            self.cumulative_error.within_3,
            self.cumulative_error.within_5,
            self.cumulative_error.within_10,
        )
    }
}

fn r2_score(y_true: &[f64], y_pred: &[f64]) -> f64 {
    let y_mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum();
    let ss_tot: f64 = y_true.iter().map(|t| (t - y_mean) * (t - y_mean)).sum();
    if ss_tot == 0.0 {
        // Constant target: perfect predictions score 1, anything else 0.
        if ss_res == 0.0 { 1.0 } else { 0.0 }
    } else {
        1.0 - ss_res / ss_tot
    }
}

fn cumulative_error(relative_errors: &[f64]) -> CumulativeError {
    let mut hist = [0usize; 100];
    for &e in relative_errors {
        if !(0.0..=100.0).contains(&e) {
            continue;
        }
        let bin = (e.floor() as usize).min(99);
        hist[bin] += 1;
    }
    let total: usize = hist.iter().sum();
    if total == 0 {
        return CumulativeError {
            within_1: 0.0,
            within_3: 0.0,
            within_5: 0.0,
            within_10: 0.0,
        };
    }
    let pct_below = |upper: usize| 100.0 * hist[..upper].iter().sum::<usize>() as f64 / total as f64;
    CumulativeError {
        within_1: pct_below(1),
        within_3: pct_below(3),
        within_5: pct_below(5),
        within_10: pct_below(10),
    }
}

/// Metrics of `y_pred` against `y_true`.
///
/// Inputs must be the same non-zero length and finite. A true value of
/// exactly zero is handled according to `policy`, never turned into an
/// infinite relative error.
pub fn compute_metrics(
    y_true: &[f64],
    y_pred: &[f64],
    policy: ZeroTargetPolicy,
) -> Result<RegressionMetrics> {
    if y_true.len() != y_pred.len() {
        return Err(DataProcessingError::ExpectedSlicesSameLength {
            expected: y_true.len(),
            other: y_pred.len(),
            context: "compute_metrics".to_string(),
        }
        .into());
    }
    if y_true.is_empty() {
        return Err(DataProcessingError::ExpectedNonEmptyData {
            context: Some("compute_metrics".to_string()),
        }
        .into());
    }
    if y_true.iter().chain(y_pred.iter()).any(|v| !v.is_finite()) {
        return Err(DataProcessingError::ExpectedFiniteNonNanData {
            context: "compute_metrics".to_string(),
        }
        .into());
    }

    let abs_err: Vec<f64> = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (p - t).abs())
        .collect();

    let mut relative = Vec::with_capacity(y_true.len());
    let mut skipped = 0;
    for (i, (t, e)) in y_true.iter().zip(abs_err.iter()).enumerate() {
        if *t == 0.0 {
            match policy {
                ZeroTargetPolicy::Error => return Err(CcsPredError::ZeroTarget { index: i }),
                ZeroTargetPolicy::SkipRow => {
                    skipped += 1;
                    continue;
                }
            }
        }
        relative.push(100.0 * e / t.abs());
    }
    if relative.is_empty() {
        return Err(DataProcessingError::ExpectedNonEmptyData {
            context: Some("compute_metrics: every target is zero".to_string()),
        }
        .into());
    }

    let mse = abs_err.iter().map(|e| e * e).sum::<f64>() / abs_err.len() as f64;
    let not_empty = |v: Option<f64>| {
        v.ok_or(DataProcessingError::ExpectedNonEmptyData {
            context: Some("compute_metrics".to_string()),
        })
    };

    Ok(RegressionMetrics {
        n_rows: y_true.len(),
        r2: r2_score(y_true, y_pred),
        mae: not_empty(mean(&abs_err))?,
        mdae: not_empty(median(&abs_err))?,
        mre: not_empty(mean(&relative))?,
        mdre: not_empty(median(&relative))?,
        rmse: mse.sqrt(),
        cumulative_error: cumulative_error(&relative),
        n_zero_targets_skipped: skipped,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainTestSummary {
    pub train: RegressionMetrics,
    pub test: RegressionMetrics,
}

impl TrainTestSummary {
    pub fn compute(
        y_train: &[f64],
        y_pred_train: &[f64],
        y_test: &[f64],
        y_pred_test: &[f64],
        policy: ZeroTargetPolicy,
    ) -> Result<Self> {
        Ok(Self {
            train: compute_metrics(y_train, y_pred_train, policy)?,
            test: compute_metrics(y_test, y_pred_test, policy)?,
        })
    }
}
