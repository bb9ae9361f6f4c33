//! Exponential moving average, seeded with the simple mean of the first
//! `period` values and smoothed with alpha = 2 / (period + 1).
//! Lookback: period - 1.

use super::Indicator;
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        Self {
            period: period.max(1),
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, bars: &[Bar]) -> Vec<f64> {
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        ema_of_series(&closes, self.period)
    }
}

/// EMA of an arbitrary series (MACD feeds its own line back through this).
///
/// A NaN inside the seed window leaves the whole output NaN; a NaN after
/// the seed poisons every later value, since each depends on its predecessor.
pub fn ema_of_series(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }

    let (seed_window, rest) = values.split_at(period);
    if seed_window.iter().any(|v| v.is_nan()) {
        return out;
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = seed_window.iter().sum::<f64>() / period as f64;
    out[period - 1] = ema;
    for (slot, &value) in out[period..].iter_mut().zip(rest) {
        ema += alpha * (value - ema);
        *slot = ema;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn seed_is_mean_then_smoothed() {
        // period 4 → alpha 0.4; seed = mean(2, 4, 6, 8) = 5
        // next: 5 + 0.4 * (10 - 5) = 7, then 7 + 0.4 * (1 - 7) = 4.6
        let out = ema_of_series(&[2.0, 4.0, 6.0, 8.0, 10.0, 1.0], 4);
        assert!(out[..3].iter().all(|v| v.is_nan()));
        assert_approx(out[3], 5.0, DEFAULT_EPSILON);
        assert_approx(out[4], 7.0, DEFAULT_EPSILON);
        assert_approx(out[5], 4.6, DEFAULT_EPSILON);
    }

    #[test]
    fn period_one_tracks_input() {
        let bars = make_bars(&[3.0, 9.0, 4.0]);
        let out = Ema::new(1).compute(&bars);
        assert_eq!(out, vec![3.0, 9.0, 4.0]);
    }

    #[test]
    fn shorter_than_period_is_all_nan() {
        assert!(ema_of_series(&[1.0, 2.0], 3).iter().all(|v| v.is_nan()));
        assert!(ema_of_series(&[], 3).is_empty());
    }

    #[test]
    fn nan_handling() {
        let in_seed = ema_of_series(&[1.0, f64::NAN, 3.0, 4.0, 5.0], 3);
        assert!(in_seed.iter().all(|v| v.is_nan()));

        let after_seed = ema_of_series(&[1.0, 2.0, 3.0, f64::NAN, 5.0], 3);
        assert_approx(after_seed[2], 2.0, DEFAULT_EPSILON);
        assert!(after_seed[3].is_nan());
        assert!(after_seed[4].is_nan());
    }

    #[test]
    fn converges_to_a_constant() {
        let mut values = vec![0.0; 5];
        values.extend(std::iter::repeat(50.0).take(200));
        let out = ema_of_series(&values, 5);
        assert_approx(*out.last().unwrap(), 50.0, 1e-9);
    }

    #[test]
    fn lookback() {
        assert_eq!(Ema::new(26).lookback(), 25);
        assert_eq!(Ema::new(0).lookback(), 0);
    }
}
