//! Moving Average Convergence Divergence (MACD).
//!
//! Line:   EMA(fast) - EMA(slow) of close.            Lookback: slow - 1.
//! Signal: EMA(signal) of the line, seeded once the
//!         line has `signal` defined values.          Lookback: slow - 1 + signal - 1.

use super::ema::ema_of_series;
use super::Indicator;
use crate::domain::Bar;

/// Which MACD output a [`Macd`] instance produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacdLine {
    Macd,
    Signal,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    line: MacdLine,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize, line: MacdLine) -> Self {
        let name = match line {
            MacdLine::Macd => format!("macd_{fast}_{slow}"),
            MacdLine::Signal => format!("macd_signal_{fast}_{slow}_{signal}"),
        };
        Self {
            fast: fast.max(1),
            slow: slow.max(1),
            signal: signal.max(1),
            line,
            name,
        }
    }

    fn line_lookback(&self) -> usize {
        self.fast.max(self.slow) - 1
    }
}

impl Indicator for Macd {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        match self.line {
            MacdLine::Macd => self.line_lookback(),
            MacdLine::Signal => self.line_lookback() + self.signal - 1,
        }
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let fast = ema_of_series(&closes, self.fast);
        let slow = ema_of_series(&closes, self.slow);
        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();

        match self.line {
            MacdLine::Macd => macd,
            MacdLine::Signal => {
                let start = self.line_lookback();
                let mut result = vec![f64::NAN; macd.len()];
                if macd.len() > start {
                    let tail = ema_of_series(&macd[start..], self.signal);
                    result[start..].copy_from_slice(&tail);
                }
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    fn closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect()
    }

    #[test]
    fn macd_line_is_ema_difference() {
        let prices = closes(40);
        let bars = make_bars(&prices);
        let line = Macd::new(3, 6, 4, MacdLine::Macd).compute(&bars);
        let fast = ema_of_series(&prices, 3);
        let slow = ema_of_series(&prices, 6);

        for i in 0..5 {
            assert!(line[i].is_nan(), "expected NaN at {i}");
        }
        for i in 5..40 {
            assert_approx(line[i], fast[i] - slow[i], DEFAULT_EPSILON);
        }
    }

    #[test]
    fn signal_warmup_matches_lookback() {
        let bars = make_bars(&closes(40));
        let macd = Macd::new(3, 6, 4, MacdLine::Signal);
        let signal = macd.compute(&bars);
        assert_eq!(macd.lookback(), 5 + 3);
        assert!(signal[..macd.lookback()].iter().all(|v| v.is_nan()));
        assert!(signal[macd.lookback()..].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn signal_seed_is_mean_of_first_line_values() {
        let bars = make_bars(&closes(30));
        let line = Macd::new(3, 6, 4, MacdLine::Macd).compute(&bars);
        let signal = Macd::new(3, 6, 4, MacdLine::Signal).compute(&bars);
        let seed = line[5..9].iter().sum::<f64>() / 4.0;
        assert_approx(signal[8], seed, DEFAULT_EPSILON);
    }

    #[test]
    fn flat_series_has_zero_macd() {
        let bars = make_bars(&[42.0; 20]);
        let line = Macd::new(2, 5, 3, MacdLine::Macd).compute(&bars);
        let signal = Macd::new(2, 5, 3, MacdLine::Signal).compute(&bars);
        assert_approx(line[19], 0.0, DEFAULT_EPSILON);
        assert_approx(signal[19], 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn short_series_is_all_nan() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let signal = Macd::new(2, 5, 3, MacdLine::Signal).compute(&bars);
        assert!(signal.iter().all(|v| v.is_nan()));
    }
}
