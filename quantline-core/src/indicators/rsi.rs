//! Relative Strength Index with Wilder smoothing.
//!
//! The first value (row `period`) averages the first `period` close-to-close
//! changes; later rows smooth with weight 1/period. The index is
//! `100 * gain / (gain + loss)`, which keeps it inside [0, 100]. Zero average
//! loss, including a flat series, gives 100.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            name: format!("rsi_{period}"),
        }
    }
}

/// Running Wilder averages of gains and losses.
#[derive(Debug, Clone, Copy)]
struct WilderAverages {
    gain: f64,
    loss: f64,
}

impl WilderAverages {
    /// Plain means over the seed changes. `None` if any change is NaN.
    fn seed(changes: &[f64]) -> Option<Self> {
        if changes.iter().any(|c| c.is_nan()) {
            return None;
        }
        let n = changes.len() as f64;
        let gain = changes.iter().map(|c| c.max(0.0)).sum::<f64>() / n;
        let loss = changes.iter().map(|c| (-c).max(0.0)).sum::<f64>() / n;
        Some(Self { gain, loss })
    }

    fn update(&mut self, change: f64, period: f64) {
        self.gain += (change.max(0.0) - self.gain) / period;
        self.loss += ((-change).max(0.0) - self.loss) / period;
    }

    fn index(&self) -> f64 {
        if self.loss == 0.0 {
            return 100.0;
        }
        (100.0 * self.gain / (self.gain + self.loss)).clamp(0.0, 100.0)
    }
}

impl Indicator for Rsi {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let mut out = vec![f64::NAN; bars.len()];
        // changes[k] is the move into bar k + 1
        let changes: Vec<f64> = bars.windows(2).map(|w| w[1].close - w[0].close).collect();
        if changes.len() < self.period {
            return out;
        }

        let Some(mut avg) = WilderAverages::seed(&changes[..self.period]) else {
            return out;
        };
        out[self.period] = avg.index();

        let period = self.period as f64;
        for (k, &change) in changes.iter().enumerate().skip(self.period) {
            if change.is_nan() {
                break;
            }
            avg.update(change, period);
            out[k + 1] = avg.index();
        }
        out
    }
}
