use std::ops::AddAssign;

#[derive(Debug, Clone, Copy)]
pub enum StreamingAggregatorError {
    NotEnoughData,
}

type Result<T> = std::result::Result<T, StreamingAggregatorError>;

/// Streaming mean and (population) variance of a stream of numbers.
///
/// Uses Welford's update, so a single pass over the column of a
/// feature matrix is enough to fit a scaler.
///
/// # Example
///
/// ```
/// use ccspred::utils::streaming_calculators::RunningStatsCalculator;
///
/// let mut calc = RunningStatsCalculator::default();
/// for v in [0.0, 10.0, 0.0, 10.0, 0.0, 10.0] {
///     calc.add(v);
/// }
/// assert!((calc.mean().unwrap() - 5.0).abs() < 1e-12);
/// assert!((calc.variance().unwrap() - 25.0).abs() < 1e-9);
/// ```
///
/// # References
///
/// - <https://nestedsoftware.com/2018/03/27/calculating-standard-deviation-on-streaming-data-253l.23919.html>
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStatsCalculator {
    count: u64,
    mean_n: f64,
    // Sum of squared deviations from the running mean.
    d_squared: f64,
    min: f64,
    max: f64,
}

impl RunningStatsCalculator {
    pub fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        }
        self.count += 1;
        let delta = value - self.mean_n;
        self.mean_n += delta / self.count as f64;
        let delta2 = value - self.mean_n;
        self.d_squared += delta * delta2;

        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> Result<f64> {
        if self.count == 0 {
            return Err(StreamingAggregatorError::NotEnoughData);
        }
        Ok(self.mean_n)
    }

    /// Population variance (ddof = 0).
    pub fn variance(&self) -> Result<f64> {
        if self.count == 0 {
            return Err(StreamingAggregatorError::NotEnoughData);
        }
        Ok((self.d_squared / self.count as f64).max(0.0))
    }

    pub fn standard_deviation(&self) -> Result<f64> {
        Ok(self.variance()?.sqrt())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// True when every value added so far is identical.
    pub fn is_constant(&self) -> bool {
        self.count > 0 && self.min == self.max
    }
}

impl AddAssign for RunningStatsCalculator {
    /// Merges two partial aggregates (Chan et al. parallel update).
    fn add_assign(&mut self, other: Self) {
        if other.count == 0 {
            return;
        }
        if self.count == 0 {
            *self = other;
            return;
        }
        let total = self.count + other.count;
        let delta = other.mean_n - self.mean_n;
        let mean = self.mean_n + delta * (other.count as f64 / total as f64);
        self.d_squared += other.d_squared
            + delta * delta * (self.count as f64 * other.count as f64 / total as f64);
        self.mean_n = mean;
        self.count = total;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}
