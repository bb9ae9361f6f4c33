//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over data sources (Yahoo Finance, CSV
//! import, synthetic) so the fetch stage can swap implementations and tests
//! can mock them. Retrying is the scheduler's job; a provider makes exactly
//! one attempt per call.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::Bar;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("provider returned HTTP {status} for {symbol}")]
    HttpStatus { status: u16, symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no bars for {symbol} between {start} and {end}")]
    NoData {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    #[error("csv import error: {0}")]
    Csv(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("raw store error: {0}")]
    StoreError(String),

    #[error("no raw data for {symbol} ({start}..{end})")]
    NotStored {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
    },
}

impl DataError {
    /// Failures of the transport rather than of the data itself.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::RateLimited { .. }
                | DataError::HttpStatus { .. }
        )
    }

    /// Failures of the local raw store.
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            DataError::ParquetError(_) | DataError::StoreError(_) | DataError::NotStored { .. }
        )
    }
}

/// Result of a successful data fetch for a single symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub bars: Vec<Bar>,
    pub source: DataSource,
}

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    YahooFinance,
    CsvImport,
    Synthetic,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataSource::YahooFinance => "yahoo_finance",
            DataSource::CsvImport => "csv_import",
            DataSource::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

/// Trait for data providers.
///
/// Implementations handle the specifics of fetching data from a particular
/// source. The raw store sits beside this trait; providers don't know about it.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch daily OHLCV bars for a symbol over an inclusive date range.
    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(DataError::NetworkUnreachable("dns".into()).is_network());
        assert!(DataError::HttpStatus {
            status: 502,
            symbol: "SPY".into()
        }
        .is_network());
        assert!(!DataError::SymbolNotFound {
            symbol: "SPY".into()
        }
        .is_network());
        assert!(DataError::ParquetError("bad footer".into()).is_storage());
    }

    #[test]
    fn source_display_matches_serde_name() {
        let json = serde_json::to_string(&DataSource::CsvImport).unwrap();
        assert_eq!(json, format!("\"{}\"", DataSource::CsvImport));
    }
}
