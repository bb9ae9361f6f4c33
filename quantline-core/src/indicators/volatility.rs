//! Rolling volatility: sample standard deviation (n - 1 denominator) of
//! daily returns over `window` trailing returns.
//! Lookback: window (the first return only exists at index 1).

use super::returns::returns_of_series;
use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Volatility {
    window: usize,
    name: String,
}

impl Volatility {
    /// `window` must be >= 2 for a sample deviation; smaller values are raised to 2.
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            name: format!("volatility_{window}"),
        }
    }
}

impl Indicator for Volatility {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.window
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let returns = returns_of_series(&closes);
        let n = returns.len();
        let mut result = vec![f64::NAN; n];

        for i in self.window..n {
            let window = &returns[(i + 1 - self.window)..=i];
            result[i] = sample_std(window);
        }

        result
    }
}

/// Two-pass sample standard deviation. NaN in, NaN out.
fn sample_std(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss: f64 = values.iter().map(|v| (v - mean) * (v - mean)).sum();
    (ss / (n - 1.0)).sqrt()
}
