//! End-to-end pipeline runs against in-process providers.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use quantline_core::data::{DataError, DataProvider, FetchResult, RawStore, SyntheticProvider};
use quantline_core::indicators::IndicatorConfig;
use quantline_core::validate::QualityRule;
use quantline_runner::config::{BackoffKind, PipelineConfig, SourceConfig};
use quantline_runner::scheduler::{ErrorKind, StageError, TaskStatus};
use quantline_runner::storage::{
    read_analysis, read_latest_metrics, read_run_report, read_validation_report,
};
use quantline_runner::{PipelineRunner, FETCH, SAVE, TRANSFORM, VALIDATE};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn small_analysis() -> IndicatorConfig {
    IndicatorConfig {
        sma_short_window: 5,
        sma_long_window: 20,
        rsi_period: 14,
        macd_fast: 12,
        macd_slow: 26,
        macd_signal: 9,
        volatility_window: 10,
    }
}

fn config_in(root: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.data.symbol = "SPY".into();
    config.data.start_date = d(2024, 1, 1);
    config.data.end_date = Some(d(2024, 6, 28));
    config.data.raw_dir = root.join("raw");
    config.data.processed_dir = root.join("processed");
    config.data.source = SourceConfig::Synthetic;
    config.pipeline.backoff = BackoffKind::None;
    config.pipeline.retries = 3;
    config.analysis = small_analysis();
    config
}

/// Fails with a network error for the first `failures` calls.
struct FlakyProvider {
    failures: u32,
    calls: AtomicU32,
    inner: SyntheticProvider,
}

impl FlakyProvider {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            inner: SyntheticProvider::new(),
        }
    }
}

#[async_trait]
impl DataProvider for FlakyProvider {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            return Err(DataError::NetworkUnreachable(format!("attempt {n} refused")));
        }
        self.inner.fetch(symbol, start, end).await
    }
}

/// Serves synthetic bars with one row whose low sits above its high.
struct CorruptProvider {
    row: usize,
}

#[async_trait]
impl DataProvider for CorruptProvider {
    fn name(&self) -> &str {
        "corrupt"
    }

    async fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError> {
        let mut result = SyntheticProvider::new().fetch(symbol, start, end).await?;
        let bar = &mut result.bars[self.row];
        bar.low = 150.0;
        bar.high = 100.0;
        Ok(result)
    }
}

#[test]
fn plan_is_fetch_transform_validate_save() {
    let dir = tempfile::tempdir().unwrap();
    let runner = PipelineRunner::new(config_in(dir.path())).unwrap();
    let graph = runner.build_graph().unwrap();
    assert_eq!(
        graph.topological_order(),
        vec![FETCH, TRANSFORM, VALIDATE, SAVE]
    );
}

#[tokio::test]
async fn synthetic_run_writes_every_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let runner = PipelineRunner::new(config.clone()).unwrap();

    let outcome = runner.run().await.unwrap();

    assert!(outcome.success(), "{}", outcome.report.summary());
    assert!(outcome.first_failure().is_none());
    for r in &outcome.report.results {
        assert_eq!(r.status, TaskStatus::Succeeded, "{}", r.task);
        assert_eq!(r.attempts, 1);
    }

    let storage = outcome.storage().unwrap();
    assert_eq!(storage.dir, outcome.output_dir);
    assert!(storage
        .dir
        .ends_with(Path::new("symbol=SPY").join("2024-01-01_2024-06-28")));

    let dataset = read_analysis(&storage.analysis, "SPY", config.analysis).unwrap();
    assert!(dataset.len() > 100);
    assert!(dataset.rows.windows(2).all(|w| w[0].date < w[1].date));

    let report = read_validation_report(&storage.dir).unwrap();
    assert!(report.is_valid);
    assert_eq!(report.metrics.data_points, dataset.len());

    let latest = read_latest_metrics(&storage.dir).unwrap();
    assert_eq!(latest.date, dataset.rows.last().unwrap().date);

    let persisted = read_run_report(&storage.dir).unwrap();
    assert_eq!(persisted.run_id, outcome.report.run_id);
    assert!(persisted.success);
    assert_eq!(persisted.results.len(), 4);
    assert_eq!(
        outcome.run_report_path.as_deref(),
        Some(storage.dir.join("run_report.json").as_path())
    );
    assert!(outcome.report_error.is_none());

    let raw = RawStore::new(&config.data.raw_dir);
    assert_eq!(
        raw.load("SPY", d(2024, 1, 1), d(2024, 6, 28)).unwrap().len(),
        dataset.len()
    );
}

#[tokio::test]
async fn transient_fetch_errors_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let provider = Arc::new(FlakyProvider::new(2));
    let runner = PipelineRunner::with_provider(config_in(dir.path()), provider.clone());

    let outcome = runner.run().await.unwrap();

    assert!(outcome.success());
    let fetch = outcome.report.get(FETCH).unwrap();
    assert_eq!(fetch.status, TaskStatus::Succeeded);
    assert_eq!(fetch.attempts, 3);
    assert!(fetch
        .attempt_failures
        .iter()
        .all(|f| f.kind == ErrorKind::Network));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_fetch_skips_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.pipeline.retries = 2;
    let provider = Arc::new(FlakyProvider::new(u32::MAX));
    let runner = PipelineRunner::with_provider(config, provider.clone());

    let outcome = runner.run().await.unwrap();

    assert!(!outcome.success());
    let (task, failure) = outcome.first_failure().unwrap();
    assert_eq!(task, FETCH);
    assert_eq!(failure.kind, ErrorKind::Network);
    assert_eq!(failure.attempt, 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    for name in [TRANSFORM, VALIDATE, SAVE] {
        assert_eq!(outcome.report.get(name).unwrap().status, TaskStatus::Skipped);
    }
    assert!(outcome.storage().is_none());
    // the report is persisted even when nothing else is
    let persisted = read_run_report(&outcome.output_dir).unwrap();
    assert!(!persisted.success);
}

#[tokio::test]
async fn low_above_high_stops_before_save() {
    let dir = tempfile::tempdir().unwrap();
    let runner = PipelineRunner::with_provider(
        config_in(dir.path()),
        Arc::new(CorruptProvider { row: 3 }),
    );

    let outcome = runner.run().await.unwrap();

    assert!(!outcome.success());
    assert_eq!(outcome.report.get(FETCH).unwrap().status, TaskStatus::Succeeded);
    assert_eq!(outcome.report.get(TRANSFORM).unwrap().status, TaskStatus::Succeeded);

    let validate = outcome.report.get(VALIDATE).unwrap();
    assert_eq!(validate.status, TaskStatus::Failed);
    assert_eq!(validate.attempts, 1);
    match &validate.cause {
        Some(StageError::DataQuality(err)) => {
            assert_eq!(err.rule, QualityRule::LowAboveHigh);
            assert_eq!(err.row, 3);
        }
        other => panic!("expected data quality failure, got {other:?}"),
    }

    let save = outcome.report.get(SAVE).unwrap();
    assert_eq!(save.status, TaskStatus::Skipped);
    assert_eq!(save.skipped_because.as_deref(), Some(VALIDATE));
    assert!(!outcome.output_dir.join("analysis.csv").exists());
}

#[tokio::test]
async fn unwritable_output_still_returns_the_report() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    // a regular file where the processed directory should be
    std::fs::write(&config.data.processed_dir, b"not a directory").unwrap();
    let runner = PipelineRunner::new(config).unwrap();

    let outcome = runner.run().await.unwrap();

    assert!(!outcome.success());
    assert!(outcome.run_report_path.is_none());
    assert!(outcome.report_error.is_some());
    assert!(outcome.storage().is_none());

    let (task, failure) = outcome.first_failure().unwrap();
    assert_eq!(task, SAVE);
    assert_eq!(failure.kind, ErrorKind::Storage);
    let save = outcome.report.get(SAVE).unwrap();
    assert_eq!(save.status, TaskStatus::Failed);
    assert_eq!(save.attempts, 3);
    assert!(save
        .attempt_failures
        .iter()
        .all(|f| f.kind == ErrorKind::Storage));
    for name in [FETCH, TRANSFORM, VALIDATE] {
        assert_eq!(outcome.report.get(name).unwrap().status, TaskStatus::Succeeded);
    }
}

#[tokio::test]
async fn identical_inputs_give_identical_output() {
    let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    let first = PipelineRunner::new(config_in(a.path())).unwrap().run().await.unwrap();
    let second = PipelineRunner::new(config_in(b.path())).unwrap().run().await.unwrap();

    let read = |outcome: &quantline_runner::PipelineOutcome| {
        std::fs::read(&outcome.storage().unwrap().analysis).unwrap()
    };
    assert_eq!(read(&first), read(&second));
    assert_ne!(first.report.run_id, second.report.run_id);
}

#[tokio::test]
async fn invalid_config_is_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.analysis.sma_short_window = 50;
    config.analysis.sma_long_window = 20;
    let provider = Arc::new(FlakyProvider::new(0));
    let runner = PipelineRunner::with_provider(config, provider.clone());

    assert!(runner.run().await.is_err());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}
