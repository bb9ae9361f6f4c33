//! Synthetic provider: a seeded random walk over weekdays.
//!
//! The seed is the BLAKE3 hash of the symbol, so the same symbol and range
//! always produce the same bars. Useful offline and in tests.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use crate::domain::Bar;

#[derive(Debug, Clone)]
pub struct SyntheticProvider {
    start_price: f64,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self { start_price: 100.0 }
    }

    pub fn with_start_price(start_price: f64) -> Self {
        Self { start_price }
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars: generate_bars(symbol, start, end, self.start_price),
            source: DataSource::Synthetic,
        })
    }
}

/// Weekday bars with daily moves in ±3% and intraday range within 1%.
pub fn generate_bars(symbol: &str, start: NaiveDate, end: NaiveDate, start_price: f64) -> Vec<Bar> {
    let seed: [u8; 32] = *blake3::hash(symbol.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let mut bars = Vec::new();
    let mut price = start_price;

    for current in start.iter_days().take_while(|d| *d <= end) {
        if matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }

        let daily_return: f64 = rng.gen_range(-0.03..0.03);
        let open = price;
        let close = price * (1.0 + daily_return);
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
        let volume = rng.gen_range(500_000..5_000_000u64);

        bars.push(Bar {
            date: current,
            open,
            high,
            low,
            close,
            volume,
            adj_close: close,
        });
        price = close;
    }

    bars
}
