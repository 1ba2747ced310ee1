/// Percentile with linear interpolation between closest ranks.
///
/// Matches the default method of most numerical packages: the rank is
/// `p / 100 * (n - 1)` on the sorted values. Returns `None` on empty input.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable_by(f64::total_cmp);
    percentile_sorted(&sorted, p)
}

pub fn percentile_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let vals = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(percentile(&vals, 0.0), Some(1.0));
        assert_eq!(percentile(&vals, 100.0), Some(4.0));
        assert_eq!(percentile(&vals, 25.0), Some(1.75));
        assert_eq!(median(&vals), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_median_odd() {
        assert_eq!(median(&[5.0, 1.0, 3.0]), Some(3.0));
    }
}
