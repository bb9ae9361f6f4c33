//! PriceSeries: the ordered daily history the pipeline works on.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Bar;

#[derive(Debug, Error, PartialEq)]
pub enum SeriesError {
    #[error("bar {index} ({date}) is not after the previous bar ({previous})")]
    OutOfOrder {
        index: usize,
        date: NaiveDate,
        previous: NaiveDate,
    },
}

/// Daily bars for one symbol, dates strictly ascending and unique.
///
/// The ordering invariant is established by [`PriceSeries::new`] (checked) or
/// [`PriceSeries::canonicalize`] (sort + dedupe); fields are private so it
/// cannot be broken afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    symbol: String,
    bars: Vec<Bar>,
}

impl PriceSeries {
    /// Build a series from bars that are already in order.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Result<Self, SeriesError> {
        for (i, pair) in bars.windows(2).enumerate() {
            if pair[1].date <= pair[0].date {
                return Err(SeriesError::OutOfOrder {
                    index: i + 1,
                    date: pair[1].date,
                    previous: pair[0].date,
                });
            }
        }
        Ok(Self {
            symbol: symbol.into(),
            bars,
        })
    }

    /// Sort by date and collapse duplicate dates, keeping the last record
    /// received for each date (providers resend corrected bars).
    pub fn canonicalize(symbol: impl Into<String>, mut bars: Vec<Bar>) -> Self {
        // Stable sort keeps arrival order among equal dates.
        bars.sort_by_key(|b| b.date);
        let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match out.last_mut() {
                Some(last) if last.date == bar.date => *last = bar,
                _ => out.push(bar),
            }
        }
        Self {
            symbol: symbol.into(),
            bars: out,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.bars.first().map(|b| b.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.bars.last().map(|b| b.date)
    }
}
