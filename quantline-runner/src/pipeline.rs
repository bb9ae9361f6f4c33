//! Pipeline runner: builds the stage graph from configuration, runs it and
//! persists the run report.

use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use quantline_core::data::{
    CsvProvider, DataError, DataProvider, RawStore, SyntheticProvider, YahooProvider,
};

use crate::config::{ConfigError, PipelineConfig, SourceConfig};
use crate::scheduler::{
    DependencyError, ErrorKind, RunObserver, RunReport, Scheduler, Task, TaskFailure, TaskGraph,
};
use crate::stages::{
    Artifact, FetchStage, SaveStage, TransformStage, ValidateStage, FETCH, SAVE, TRANSFORM,
    VALIDATE,
};
use crate::storage::{ProcessedStore, StorageError, StorageRef};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data source error: {0}")]
    Provider(#[from] DataError),
    #[error("invalid task graph: {0}")]
    Graph(#[from] DependencyError),
}

/// What a finished run produced.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub report: RunReport<Artifact>,
    /// Output directory of this run (whether or not save succeeded).
    pub output_dir: PathBuf,
    /// Where `run_report.json` landed, if it could be written.
    pub run_report_path: Option<PathBuf>,
    pub report_error: Option<StorageError>,
}

impl PipelineOutcome {
    pub fn success(&self) -> bool {
        self.report.success
    }

    /// Name and error of the first failed task in dependency order.
    pub fn first_failure(&self) -> Option<(&str, &TaskFailure)> {
        self.report
            .first_failure()
            .and_then(|r| r.error.as_ref().map(|e| (r.task.as_str(), e)))
    }

    pub fn storage(&self) -> Option<&StorageRef> {
        self.report.output(SAVE).and_then(|a| a.as_stored())
    }
}

pub struct PipelineRunner {
    config: PipelineConfig,
    provider: Arc<dyn DataProvider>,
    end: NaiveDate,
    observer: Option<Arc<dyn RunObserver>>,
}

impl PipelineRunner {
    /// Build a runner using the data source named in the configuration.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        let provider = provider_for(&config.data.source)?;
        Ok(Self::with_provider(config, provider))
    }

    /// Build a runner around an explicit provider (tests, embedding).
    pub fn with_provider(config: PipelineConfig, provider: Arc<dyn DataProvider>) -> Self {
        let end = config.end_date_or(Local::now().date_naive());
        Self {
            config,
            provider,
            end,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start and end of the requested range, resolved once per runner.
    pub fn date_range(&self) -> (NaiveDate, NaiveDate) {
        (self.config.data.start_date, self.end)
    }

    pub fn processed_store(&self) -> ProcessedStore {
        ProcessedStore::new(&self.config.data.processed_dir)
    }

    /// fetch → transform → validate → save, with per-stage policy from config.
    pub fn build_graph(&self) -> Result<TaskGraph<Artifact>, DependencyError> {
        let data = &self.config.data;
        let settings = &self.config.pipeline;
        let priorities = settings.priorities;
        let retry = settings.retry_policy();
        let (start, end) = self.date_range();

        let fetch = Task::new(
            FETCH,
            Arc::new(FetchStage::new(
                Arc::clone(&self.provider),
                RawStore::new(&data.raw_dir),
                &data.symbol,
                start,
                end,
            )),
        )
        .with_priority(priorities.fetch);

        let transform = Task::new(TRANSFORM, Arc::new(TransformStage::new(self.config.analysis)))
            .depends_on(FETCH)
            .with_priority(priorities.transform);

        let validate = Task::new(VALIDATE, Arc::new(ValidateStage))
            .depends_on(TRANSFORM)
            .with_priority(priorities.validate);

        let save = Task::new(
            SAVE,
            Arc::new(SaveStage::new(self.processed_store(), start, end)),
        )
        .depends_on(VALIDATE)
        .with_priority(priorities.save);

        let tasks = [fetch, transform, validate, save]
            .into_iter()
            .map(|t| {
                let timeout = settings.timeout_for(t.name());
                t.with_retry(retry).with_timeout(timeout)
            })
            .collect();
        TaskGraph::new(tasks)
    }

    /// Run the pipeline once and persist the run report next to the output.
    ///
    /// A failed stage is not an `Err`: the outcome carries the report and
    /// the first failure. Neither is a report that could not be written,
    /// which lands in `report_error`. `Err` is reserved for problems that
    /// stop the run from starting.
    pub async fn run(&self) -> Result<PipelineOutcome, PipelineError> {
        self.config.validate()?;
        let graph = self.build_graph()?;
        let (start, end) = self.date_range();
        info!(
            symbol = %self.config.data.symbol,
            %start,
            %end,
            provider = self.provider.name(),
            "pipeline starting"
        );

        let mut scheduler = Scheduler::new(self.config.pipeline.workers);
        if let Some(observer) = &self.observer {
            scheduler = scheduler.with_observer(Arc::clone(observer));
        }
        let report = scheduler.run(&graph).await;

        let store = self.processed_store();
        let output_dir = store.run_dir(&self.config.data.symbol, start, end);
        let persisted = match serde_json::to_vec_pretty(&report) {
            Ok(json) => store.write_run_report(&output_dir, &json).await,
            Err(e) => Err(StorageError::from(e)),
        };
        let (run_report_path, report_error) = match persisted {
            Ok(path) => (Some(path), None),
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "failed to persist run report");
                (None, Some(e))
            }
        };

        let outcome = PipelineOutcome {
            report,
            output_dir,
            run_report_path,
            report_error,
        };
        match outcome.first_failure() {
            None if outcome.success() => {
                info!(run_id = %outcome.report.run_id, "pipeline succeeded")
            }
            None => warn!(run_id = %outcome.report.run_id, "pipeline incomplete"),
            Some((task, failure)) => {
                if failure.kind == ErrorKind::DataQuality {
                    error!(task, %failure, "pipeline stopped by data quality check");
                } else {
                    error!(task, %failure, "pipeline failed");
                }
            }
        }
        Ok(outcome)
    }
}

/// Provider for a configured source.
pub fn provider_for(source: &SourceConfig) -> Result<Arc<dyn DataProvider>, DataError> {
    Ok(match source {
        SourceConfig::Yahoo => Arc::new(YahooProvider::new()?),
        SourceConfig::Synthetic => Arc::new(SyntheticProvider::new()),
        SourceConfig::Csv { path } => Arc::new(CsvProvider::new(path)),
    })
}
