//! Simple Moving Average (SMA).
//!
//! Rolling mean of close prices over a lookback window.
//! Lookback: period - 1 (first valid value at index period-1).

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    /// `period` must be >= 1; [`IndicatorConfig::validate`](super::IndicatorConfig::validate)
    /// guarantees this for configured windows.
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            name: format!("sma_{period}"),
        }
    }
}

impl Indicator for Sma {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        sma_of_series(&closes, self.period)
    }
}

/// Rolling mean of an arbitrary series. A NaN anywhere in the window makes
/// that position NaN.
pub fn sma_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let n = values.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || n < period {
        return result;
    }

    // Compute initial window sum
    let mut sum = 0.0;
    let mut nan_in_window = false;
    for &v in values.iter().take(period) {
        if v.is_nan() {
            nan_in_window = true;
        }
        sum += v;
    }

    if !nan_in_window {
        result[period - 1] = sum / period as f64;
    }

    // Roll the window forward
    for i in period..n {
        let leaving = values[i - period];
        let entering = values[i];
        sum = sum - leaving + entering;

        // A NaN poisons the running sum; rescan the window until it has left.
        if entering.is_nan() || leaving.is_nan() || nan_in_window {
            nan_in_window = false;
            sum = 0.0;
            for &v in &values[(i + 1 - period)..=i] {
                if v.is_nan() {
                    nan_in_window = true;
                }
                sum += v;
            }
            if nan_in_window {
                continue;
            }
        }

        result[i] = sum / period as f64;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn sma_5_basic() {
        let bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0, 16.0]);
        let sma = Sma::new(5);
        let result = sma.compute(&bars);

        assert_eq!(result.len(), 7);
        for (i, v) in result.iter().enumerate().take(4) {
            assert!(v.is_nan(), "expected NaN at index {i}");
        }
        // SMA[4] = mean(10,11,12,13,14) = 12.0
        assert_approx(result[4], 12.0, DEFAULT_EPSILON);
        assert_approx(result[5], 13.0, DEFAULT_EPSILON);
        assert_approx(result[6], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_1_is_close() {
        let bars = make_bars(&[100.0, 200.0, 300.0]);
        let result = Sma::new(1).compute(&bars);
        assert_approx(result[0], 100.0, DEFAULT_EPSILON);
        assert_approx(result[1], 200.0, DEFAULT_EPSILON);
        assert_approx(result[2], 300.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_nan_propagation() {
        let mut bars = make_bars(&[10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
        bars[2].close = f64::NAN;
        let result = Sma::new(3).compute(&bars);
        // Windows touching index 2 are NaN
        assert!(result[2].is_nan());
        assert!(result[3].is_nan());
        assert!(result[4].is_nan());
        // Index 5 window [13,14,15] → 14.0
        assert_approx(result[5], 14.0, DEFAULT_EPSILON);
    }

    #[test]
    fn sma_defined_count() {
        let bars = make_bars(&[1.0; 10]);
        let defined = Sma::new(4)
            .compute(&bars)
            .iter()
            .filter(|v| !v.is_nan())
            .count();
        assert_eq!(defined, 10 - 4 + 1);
    }

    #[test]
    fn sma_lookback() {
        assert_eq!(Sma::new(20).lookback(), 19);
        assert_eq!(Sma::new(1).lookback(), 0);
    }

    #[test]
    fn sma_too_few_bars() {
        let bars = make_bars(&[10.0, 11.0]);
        let result = Sma::new(5).compute(&bars);
        assert!(result.iter().all(|v| v.is_nan()));
    }
}
