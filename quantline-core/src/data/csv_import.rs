//! CSV import provider.
//!
//! Reads the layout Yahoo Finance uses for downloaded history:
//! `Date,Open,High,Low,Close,Adj Close,Volume`. `Adj Close` is optional and
//! `null` cells become NaN so the fetch stage rejects the row rather than
//! the whole import failing.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::provider::{DataError, DataProvider, DataSource, FetchResult};
use crate::domain::Bar;

#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "Date")]
    date: String,
    #[serde(rename = "Open")]
    open: String,
    #[serde(rename = "High")]
    high: String,
    #[serde(rename = "Low")]
    low: String,
    #[serde(rename = "Close")]
    close: String,
    #[serde(rename = "Adj Close", default)]
    adj_close: Option<String>,
    #[serde(rename = "Volume")]
    volume: String,
}

/// Serves bars from a local CSV file, filtered to the requested range.
#[derive(Debug, Clone)]
pub struct CsvProvider {
    path: PathBuf,
}

impl CsvProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv_import"
    }

    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| DataError::Csv(format!("{}: {e}", self.path.display())))?;
        let bars = parse_csv(bytes.as_slice())?
            .into_iter()
            .filter(|b| b.date >= start && b.date <= end)
            .collect();
        Ok(FetchResult {
            symbol: symbol.to_string(),
            bars,
            source: DataSource::CsvImport,
        })
    }
}

/// Parse every row of a Yahoo-layout CSV document.
pub fn parse_csv<R: Read>(reader: R) -> Result<Vec<Bar>, DataError> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut bars = Vec::new();

    for (line, record) in rdr.deserialize::<CsvRecord>().enumerate() {
        let record = record.map_err(|e| DataError::Csv(format!("row {}: {e}", line + 1)))?;
        let date = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d")
            .map_err(|e| DataError::Csv(format!("row {}: bad date '{}': {e}", line + 1, record.date)))?;
        let close = price(&record.close);
        bars.push(Bar {
            date,
            open: price(&record.open),
            high: price(&record.high),
            low: price(&record.low),
            close,
            volume: record.volume.parse::<f64>().map(|v| v as u64).unwrap_or(0),
            adj_close: record.adj_close.as_deref().map(price).unwrap_or(close),
        });
    }

    Ok(bars)
}

fn price(cell: &str) -> f64 {
    cell.parse().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Date,Open,High,Low,Close,Adj Close,Volume
2024-01-02,470.0,475.0,469.0,472.5,470.1,1000
2024-01-03,null,null,null,null,null,null
2024-01-04,472.0,476.0,471.0,474.0,471.9,1200
";

    #[test]
    fn parses_yahoo_layout() {
        let bars = parse_csv(SAMPLE.as_bytes()).unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].adj_close, 470.1);
        assert!(bars[1].is_void());
        assert_eq!(bars[1].volume, 0);
        assert_eq!(bars[2].volume, 1200);
    }

    #[test]
    fn adj_close_column_is_optional() {
        let csv = "Date,Open,High,Low,Close,Volume\n2024-01-02,1,2,0.5,1.5,10\n";
        let bars = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(bars[0].adj_close, 1.5);
    }

    #[test]
    fn bad_date_is_an_error() {
        let csv = "Date,Open,High,Low,Close,Volume\n02/01/2024,1,2,0.5,1.5,10\n";
        assert!(matches!(parse_csv(csv.as_bytes()), Err(DataError::Csv(_))));
    }

    #[tokio::test]
    async fn fetch_filters_by_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spy.csv");
        std::fs::write(&path, SAMPLE).unwrap();

        let provider = CsvProvider::new(&path);
        let result = provider
            .fetch(
                "SPY",
                NaiveDate::from_ymd_opt(2024, 1, 3).unwrap(),
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(result.bars.len(), 2);
        assert_eq!(result.source, DataSource::CsvImport);
    }
}
