//! Raw bar store: Parquet files with Hive-style partitioning.
//!
//! Layout: `{raw_dir}/symbol={SYMBOL}/{start}_{end}.parquet`, plus a
//! `{start}_{end}.meta.json` sidecar (bar count, date range, BLAKE3 data
//! hash, source, cached-at).
//!
//! Writes are atomic (write to `.tmp`, rename into place). A file that fails
//! to load is renamed to `.quarantined` and reported as missing.

use chrono::{DateTime, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::provider::{DataError, DataSource};
use crate::domain::Bar;

const COLUMNS: [&str; 7] = ["date", "open", "high", "low", "close", "volume", "adj_close"];

/// Metadata sidecar for one stored range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMeta {
    pub symbol: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub bar_count: usize,
    pub data_hash: String,
    pub source: DataSource,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RawStore {
    raw_dir: PathBuf,
}

impl RawStore {
    pub fn new(raw_dir: impl Into<PathBuf>) -> Self {
        Self {
            raw_dir: raw_dir.into(),
        }
    }

    pub fn raw_dir(&self) -> &Path {
        &self.raw_dir
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.raw_dir.join(format!("symbol={symbol}"))
    }

    /// `{raw_dir}/symbol={SYMBOL}/{start}_{end}.parquet`
    pub fn data_path(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{start}_{end}.parquet"))
    }

    pub fn meta_path(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{start}_{end}.meta.json"))
    }

    /// Store `bars` (already canonical) for the requested range. Returns the
    /// Parquet path.
    pub fn write(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        bars: &[Bar],
        source: DataSource,
    ) -> Result<PathBuf, DataError> {
        let (first, last) = match (bars.first(), bars.last()) {
            (Some(f), Some(l)) => (f.date, l.date),
            _ => return Err(DataError::StoreError("no bars to store".into())),
        };

        fs::create_dir_all(self.symbol_dir(symbol))
            .map_err(|e| DataError::StoreError(format!("failed to create dir: {e}")))?;

        let mut df = bars_to_dataframe(bars)?;
        let path = self.data_path(symbol, start, end);
        let tmp_path = path.with_extension("parquet.tmp");
        write_parquet(&mut df, &tmp_path)?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::StoreError(format!("atomic rename failed: {e}"))
        })?;

        let meta = RawMeta {
            symbol: symbol.to_string(),
            start_date: first,
            end_date: last,
            bar_count: bars.len(),
            data_hash: hash_bars(bars)?,
            source,
            cached_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::StoreError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(symbol, start, end), meta_json)
            .map_err(|e| DataError::StoreError(format!("meta write: {e}")))?;

        debug!(path = %path.display(), bars = bars.len(), "raw bars stored");
        Ok(path)
    }

    /// Load a stored range. Corrupt files are quarantined and reported as
    /// [`DataError::NotStored`].
    pub fn load(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>, DataError> {
        let path = self.data_path(symbol, start, end);
        let not_stored = || DataError::NotStored {
            symbol: symbol.to_string(),
            start,
            end,
        };
        if !path.exists() {
            return Err(not_stored());
        }

        match load_and_validate_parquet(&path) {
            Ok(bars) => Ok(bars),
            Err(e) => {
                let quarantine = path.with_extension("parquet.quarantined");
                warn!(path = %path.display(), error = %e, "quarantining corrupt raw file");
                let _ = fs::rename(&path, &quarantine);
                Err(not_stored())
            }
        }
    }

    pub fn meta(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Option<RawMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, start, end)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// BLAKE3 over the JSON encoding of the bars.
pub fn hash_bars(bars: &[Bar]) -> Result<String, DataError> {
    let bytes = serde_json::to_vec(bars)
        .map_err(|e| DataError::StoreError(format!("hash serialization: {e}")))?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, DataError> {
    let epoch = epoch();
    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.date - epoch).num_days() as i32)
        .collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let adj_closes: Vec<f64> = bars.iter().map(|b| b.adj_close).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("adj_close".into(), adj_closes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<Bar>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ParquetError("empty parquet file".into()));
    }
    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(DataError::ParquetError(format!("missing column '{name}'")));
        }
    }

    dataframe_to_bars(&df)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<Bar>, DataError> {
    let col = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column {name}: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| DataError::ParquetError(format!("{name} column type: {e}"));

    let date_ca = col("date")?.date().map_err(|e| type_err("date", e))?;
    let open_ca = col("open")?.f64().map_err(|e| type_err("open", e))?;
    let high_ca = col("high")?.f64().map_err(|e| type_err("high", e))?;
    let low_ca = col("low")?.f64().map_err(|e| type_err("low", e))?;
    let close_ca = col("close")?.f64().map_err(|e| type_err("close", e))?;
    let vol_ca = col("volume")?.u64().map_err(|e| type_err("volume", e))?;
    let adj_ca = col("adj_close")?.f64().map_err(|e| type_err("adj_close", e))?;

    let epoch = epoch();
    let n = df.height();
    let mut bars = Vec::with_capacity(n);

    for i in 0..n {
        let days = date_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
        bars.push(Bar {
            date: epoch + chrono::Duration::days(days as i64),
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            adj_close: adj_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn sample_bars() -> Vec<Bar> {
        vec![
            Bar {
                date: d(2),
                open: 100.0,
                high: 102.0,
                low: 99.0,
                close: 101.0,
                volume: 1000,
                adj_close: 101.0,
            },
            Bar {
                date: d(3),
                open: 101.0,
                high: 103.0,
                low: 100.0,
                close: 102.0,
                volume: 1100,
                adj_close: 102.0,
            },
        ]
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = RawStore::new(dir.path());

        let path = store
            .write("SPY", d(1), d(5), &sample_bars(), DataSource::Synthetic)
            .unwrap();
        assert!(path.ends_with("symbol=SPY/2024-01-01_2024-01-05.parquet"));

        let loaded = store.load("SPY", d(1), d(5)).unwrap();
        assert_eq!(loaded, sample_bars());
    }

    #[test]
    fn sidecar_records_hash_and_range() {
        let dir = tempfile::tempdir().unwrap();
        let store = RawStore::new(dir.path());
        store
            .write("SPY", d(1), d(5), &sample_bars(), DataSource::CsvImport)
            .unwrap();

        let meta = store.meta("SPY", d(1), d(5)).unwrap();
        assert_eq!(meta.bar_count, 2);
        assert_eq!(meta.start_date, d(2));
        assert_eq!(meta.end_date, d(3));
        assert_eq!(meta.source, DataSource::CsvImport);
        assert_eq!(meta.data_hash, hash_bars(&sample_bars()).unwrap());
    }

    #[test]
    fn missing_range_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let store = RawStore::new(dir.path());
        assert!(matches!(
            store.load("SPY", d(1), d(5)),
            Err(DataError::NotStored { .. })
        ));
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let path = store.data_path("SPY", d(1), d(5));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"not parquet").unwrap();

        assert!(store.load("SPY", d(1), d(5)).is_err());
        assert!(!path.exists());
        assert!(path.with_extension("parquet.quarantined").exists());
    }

    #[test]
    fn empty_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = RawStore::new(dir.path());
        assert!(store
            .write("SPY", d(1), d(5), &[], DataSource::Synthetic)
            .is_err());
    }
}
