//! Indicator library.
//!
//! Indicators are pure functions: bar history in, numeric series out. Every
//! series has the same length as the input; positions inside the warm-up
//! (`lookback()`) hold `f64::NAN`. The dataset layer turns warm-up positions
//! into "undefined" cells so the validator can tell insufficient history apart
//! from a computation error.
//!
//! Multi-series indicators (MACD) are exposed as separate named instances per
//! line, keeping the single-series `Indicator` trait unchanged.

pub mod ema;
pub mod macd;
pub mod returns;
pub mod rsi;
pub mod sma;
pub mod volatility;

pub use ema::Ema;
pub use macd::{Macd, MacdLine};
pub use returns::DailyReturn;
pub use rsi::Rsi;
pub use sma::Sma;
pub use volatility::Volatility;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::Bar;

/// Trait for indicators.
///
/// # Look-ahead contamination guard
/// No value at bar t may depend on price data from bar t+1 or later.
pub trait Indicator: Send + Sync {
    /// Human-readable name (e.g., "sma_20", "rsi_14").
    fn name(&self) -> &str;

    /// Number of leading bars that cannot produce a value.
    fn lookback(&self) -> usize;

    /// Compute the indicator for the entire bar series.
    ///
    /// Returns a `Vec<f64>` of the same length as `bars`.
    fn compute(&self, bars: &[Bar]) -> Vec<f64>;
}

#[derive(Debug, Error, PartialEq)]
pub enum IndicatorConfigError {
    #[error("{field} must be >= {min} (got {value})")]
    WindowTooSmall {
        field: &'static str,
        min: usize,
        value: usize,
    },
    #[error("{short} ({short_value}) must be smaller than {long} ({long_value})")]
    WindowOrder {
        short: &'static str,
        short_value: usize,
        long: &'static str,
        long_value: usize,
    },
}

/// Window parameters for every computed column.
///
/// The `sma_short` / `sma_long` aliases accept the key names used by older
/// configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    #[serde(alias = "sma_short")]
    pub sma_short_window: usize,
    #[serde(alias = "sma_long")]
    pub sma_long_window: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub volatility_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_short_window: 50,
            sma_long_window: 200,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            volatility_window: 20,
        }
    }
}

impl IndicatorConfig {
    pub fn validate(&self) -> Result<(), IndicatorConfigError> {
        let minimums = [
            ("sma_short_window", self.sma_short_window, 1),
            ("sma_long_window", self.sma_long_window, 1),
            ("rsi_period", self.rsi_period, 1),
            ("macd_fast", self.macd_fast, 1),
            ("macd_slow", self.macd_slow, 1),
            ("macd_signal", self.macd_signal, 1),
            // sample standard deviation needs two observations
            ("volatility_window", self.volatility_window, 2),
        ];
        for (field, value, min) in minimums {
            if value < min {
                return Err(IndicatorConfigError::WindowTooSmall { field, min, value });
            }
        }
        if self.sma_short_window >= self.sma_long_window {
            return Err(IndicatorConfigError::WindowOrder {
                short: "sma_short_window",
                short_value: self.sma_short_window,
                long: "sma_long_window",
                long_value: self.sma_long_window,
            });
        }
        if self.macd_fast >= self.macd_slow {
            return Err(IndicatorConfigError::WindowOrder {
                short: "macd_fast",
                short_value: self.macd_fast,
                long: "macd_slow",
                long_value: self.macd_slow,
            });
        }
        Ok(())
    }
}

/// Create synthetic bars from close prices for testing.
///
/// Generates plausible OHLV: open = prev_close (or close for first bar),
/// high = max(open,close) + 1.0, low = min(open,close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<Bar> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            let high = open.max(close) + 1.0;
            let low = open.min(close) - 1.0;
            Bar {
                date: base_date + chrono::Duration::days(i as i64),
                open,
                high,
                low,
                close,
                volume: 1000,
                adj_close: close,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
