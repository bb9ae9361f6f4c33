//! Daily simple return: close[t] / close[t-1] - 1.
//! Lookback: 1.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone, Default)]
pub struct DailyReturn;

impl Indicator for DailyReturn {
    fn name(&self) -> &str {
        "daily_return"
    }

    fn lookback(&self) -> usize {
        1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        returns_of_series(&closes)
    }
}

/// Simple returns of a price series; index 0 is NaN.
///
/// A zero previous price gives a non-finite return, which the validator
/// reports as a computation error rather than silently dropping.
pub fn returns_of_series(prices: &[f64]) -> Vec<f64> {
    let mut result = vec![f64::NAN; prices.len()];
    for i in 1..prices.len() {
        result[i] = prices[i] / prices[i - 1] - 1.0;
    }
    result
}
