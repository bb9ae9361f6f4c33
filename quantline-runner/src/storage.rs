//! Processed-output store.
//!
//! Layout: `{processed_dir}/symbol={SYMBOL}/{start}_{end}/` containing
//! - `analysis.csv`: one row per date, bar fields plus every indicator column
//! - `validation_report.json`
//! - `latest_metrics.json`
//! - `run_report.json`: written by the pipeline runner after the run
//!
//! Every file is written to a `.tmp` sibling and renamed into place, so a
//! reader never observes a half-written file.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use quantline_core::dataset::{IndicatorDataset, IndicatorRow, LatestMetrics};
use quantline_core::indicators::IndicatorConfig;
use quantline_core::validate::{ValidatedDataset, ValidationReport};

use crate::scheduler::PersistedRunReport;

pub const ANALYSIS_FILE: &str = "analysis.csv";
pub const VALIDATION_FILE: &str = "validation_report.json";
pub const LATEST_METRICS_FILE: &str = "latest_metrics.json";
pub const RUN_REPORT_FILE: &str = "run_report.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("dataset has no rows")]
    EmptyDataset,
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Paths written by the save stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub dir: PathBuf,
    pub analysis: PathBuf,
    pub validation_report: PathBuf,
    pub latest_metrics: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProcessedStore {
    processed_dir: PathBuf,
}

impl ProcessedStore {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
        }
    }

    pub fn processed_dir(&self) -> &Path {
        &self.processed_dir
    }

    pub fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.processed_dir.join(format!("symbol={symbol}"))
    }

    /// `{processed_dir}/symbol={SYMBOL}/{start}_{end}/`
    pub fn run_dir(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{start}_{end}"))
    }

    /// Most recent output directory for `symbol`, by end date then start date.
    pub fn latest_run_dir(&self, symbol: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(self.symbol_dir(symbol)).ok()?;
        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().into_string().ok()?;
                let (start, end) = parse_range(&name)?;
                Some(((end, start), e.path()))
            })
            .max_by_key(|(key, _)| *key)
            .map(|(_, path)| path)
    }

    /// Persist the analysis table, validation report and latest metrics.
    pub async fn save(
        &self,
        validated: &ValidatedDataset,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<StorageRef, StorageError> {
        let dataset = &validated.dataset;
        let latest = dataset.latest_metrics().ok_or(StorageError::EmptyDataset)?;

        let dir = self.run_dir(&dataset.symbol, start, end);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err(&dir))?;

        let storage = StorageRef {
            analysis: dir.join(ANALYSIS_FILE),
            validation_report: dir.join(VALIDATION_FILE),
            latest_metrics: dir.join(LATEST_METRICS_FILE),
            dir,
        };

        write_atomic(&storage.analysis, &analysis_csv(dataset)?).await?;
        write_atomic(
            &storage.validation_report,
            &serde_json::to_vec_pretty(&validated.report)?,
        )
        .await?;
        write_atomic(&storage.latest_metrics, &serde_json::to_vec_pretty(&latest)?).await?;

        Ok(storage)
    }

    pub async fn write_run_report(
        &self,
        dir: &Path,
        report_json: &[u8],
    ) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))?;
        let path = dir.join(RUN_REPORT_FILE);
        write_atomic(&path, report_json).await?;
        Ok(path)
    }
}

/// Serialize the dataset rows as CSV.
pub fn analysis_csv(dataset: &IndicatorDataset) -> Result<Vec<u8>, StorageError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    for row in &dataset.rows {
        wtr.serialize(row)?;
    }
    wtr.into_inner()
        .map_err(|e| StorageError::Csv(e.into_error().into()))
}

/// Read `analysis.csv` back into a dataset.
pub fn read_analysis(
    path: &Path,
    symbol: &str,
    config: IndicatorConfig,
) -> Result<IndicatorDataset, StorageError> {
    let mut rdr = csv::Reader::from_path(path)?;
    let rows = rdr
        .deserialize::<IndicatorRow>()
        .collect::<Result<Vec<_>, _>>()?;
    Ok(IndicatorDataset {
        symbol: symbol.to_string(),
        config,
        rows,
    })
}

pub fn read_validation_report(dir: &Path) -> Result<ValidationReport, StorageError> {
    read_json(&dir.join(VALIDATION_FILE))
}

pub fn read_latest_metrics(dir: &Path) -> Result<LatestMetrics, StorageError> {
    read_json(&dir.join(LATEST_METRICS_FILE))
}

pub fn read_run_report(dir: &Path) -> Result<PersistedRunReport, StorageError> {
    read_json(&dir.join(RUN_REPORT_FILE))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StorageError> {
    let bytes = std::fs::read(path).map_err(io_err(path))?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await.map_err(io_err(&tmp))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(path)(e));
    }
    Ok(())
}

/// `{start}_{end}` run directory name back into its dates.
pub fn parse_range(name: &str) -> Option<(NaiveDate, NaiveDate)> {
    let (start, end) = name.split_once('_')?;
    Some((
        NaiveDate::parse_from_str(start, "%Y-%m-%d").ok()?,
        NaiveDate::parse_from_str(end, "%Y-%m-%d").ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quantline_core::data::synthetic::generate_bars;
    use quantline_core::domain::PriceSeries;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn config() -> IndicatorConfig {
        IndicatorConfig {
            sma_short_window: 5,
            sma_long_window: 10,
            rsi_period: 5,
            macd_fast: 3,
            macd_slow: 6,
            macd_signal: 3,
            volatility_window: 5,
        }
    }

    fn validated() -> ValidatedDataset {
        let bars = generate_bars("SPY", d(2024, 1, 1), d(2024, 3, 31), 100.0);
        let series = PriceSeries::new("SPY", bars).unwrap();
        ValidatedDataset::check(IndicatorDataset::compute(&series, &config())).unwrap()
    }

    #[tokio::test]
    async fn save_writes_layout_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProcessedStore::new(dir.path());
        let v = validated();

        let storage = store.save(&v, d(2024, 1, 1), d(2024, 3, 31)).await.unwrap();
        assert!(storage
            .dir
            .ends_with("symbol=SPY/2024-01-01_2024-03-31"));
        assert!(storage.analysis.exists());
        assert!(storage.validation_report.exists());
        assert!(storage.latest_metrics.exists());

        let back = read_analysis(&storage.analysis, "SPY", config()).unwrap();
        assert_eq!(back.len(), v.dataset.len());
        for (a, b) in back.rows.iter().zip(&v.dataset.rows) {
            assert_eq!(a.date, b.date);
            assert_eq!(a.close, b.close);
            assert_eq!(a.sma_long, b.sma_long);
            assert_eq!(a.market_regime, b.market_regime);
        }

        let report = read_validation_report(&storage.dir).unwrap();
        assert_eq!(report, v.report);
        let latest = read_latest_metrics(&storage.dir).unwrap();
        assert_eq!(Some(latest), v.dataset.latest_metrics());
    }

    #[tokio::test]
    async fn validation_report_floats_read_back_exactly() {
        use quantline_core::dataset::MarketRegime;
        use quantline_core::validate::{DateRange, QualityMetrics};

        let dir = tempfile::tempdir().unwrap();
        let report = ValidationReport {
            is_valid: true,
            info_messages: vec!["Data points: 3".into()],
            warnings: vec![],
            metrics: QualityMetrics {
                data_points: 3,
                date_range: Some(DateRange {
                    start: d(2024, 1, 2),
                    end: d(2024, 1, 4),
                }),
                avg_daily_volume: 1_234_567.891_234_567_8,
                volatility_mean: Some(0.027_403_817_653_090_662),
                missing_data_pct: 100.0 / 3.0,
                current_market_regime: Some(MarketRegime::Bullish),
                current_rsi: Some(96.187_263_527_591_91),
            },
        };

        let path = dir.path().join(VALIDATION_FILE);
        write_atomic(&path, &serde_json::to_vec_pretty(&report).unwrap())
            .await
            .unwrap();
        let back = read_validation_report(dir.path()).unwrap();
        assert_eq!(back, report);
        assert_eq!(
            back.metrics.current_rsi.map(f64::to_bits),
            report.metrics.current_rsi.map(f64::to_bits)
        );
    }

    #[test]
    fn run_dir_names_parse_back_to_dates() {
        assert_eq!(
            parse_range("2024-01-01_2024-06-28"),
            Some((d(2024, 1, 1), d(2024, 6, 28)))
        );
        assert_eq!(parse_range("scratch"), None);
        assert_eq!(parse_range("2024-01-01_later"), None);
    }

    #[tokio::test]
    async fn latest_run_dir_prefers_latest_end() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProcessedStore::new(dir.path());
        for (s, e) in [
            (d(2024, 1, 1), d(2024, 2, 1)),
            (d(2023, 1, 1), d(2024, 3, 1)),
        ] {
            std::fs::create_dir_all(store.run_dir("SPY", s, e)).unwrap();
        }
        std::fs::create_dir_all(store.symbol_dir("SPY").join("scratch")).unwrap();

        let latest = store.latest_run_dir("SPY").unwrap();
        assert!(latest.ends_with("2023-01-01_2024-03-01"));
        assert!(store.latest_run_dir("QQQ").is_none());
    }

    #[tokio::test]
    async fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProcessedStore::new(dir.path());
        let storage = store
            .save(&validated(), d(2024, 1, 1), d(2024, 3, 31))
            .await
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(&storage.dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
