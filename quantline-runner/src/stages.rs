//! The four pipeline stages and the artifact passed between them.
//!
//! fetch → transform → validate → save. Each stage is an [`Executable`] over
//! [`Artifact`]; the scheduler owns retries and timeouts, so a stage makes a
//! single attempt per call.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info};

use quantline_core::data::{DataError, DataProvider, RawStore};
use quantline_core::dataset::IndicatorDataset;
use quantline_core::domain::PriceSeries;
use quantline_core::indicators::IndicatorConfig;
use quantline_core::validate::ValidatedDataset;

use crate::scheduler::{Executable, Inputs, StageError};
use crate::storage::{ProcessedStore, StorageError, StorageRef};

pub const FETCH: &str = "fetch";
pub const TRANSFORM: &str = "transform";
pub const VALIDATE: &str = "validate";
pub const SAVE: &str = "save";

/// Output of a pipeline stage.
#[derive(Debug, Clone)]
pub enum Artifact {
    Prices(PriceSeries),
    Indicators(IndicatorDataset),
    Validated(ValidatedDataset),
    Stored(StorageRef),
}

impl Artifact {
    pub fn kind(&self) -> &'static str {
        match self {
            Artifact::Prices(_) => "prices",
            Artifact::Indicators(_) => "indicators",
            Artifact::Validated(_) => "validated",
            Artifact::Stored(_) => "stored",
        }
    }

    pub fn as_prices(&self) -> Option<&PriceSeries> {
        match self {
            Artifact::Prices(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_indicators(&self) -> Option<&IndicatorDataset> {
        match self {
            Artifact::Indicators(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_validated(&self) -> Option<&ValidatedDataset> {
        match self {
            Artifact::Validated(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_stored(&self) -> Option<&StorageRef> {
        match self {
            Artifact::Stored(s) => Some(s),
            _ => None,
        }
    }
}

fn wrong_artifact(task: &str, dependency: &str, got: &Artifact) -> StageError {
    StageError::Internal(format!(
        "task '{task}' got a {} artifact from '{dependency}'",
        got.kind()
    ))
}

impl From<DataError> for StageError {
    fn from(e: DataError) -> Self {
        if e.is_network() {
            StageError::Network(e.to_string())
        } else if e.is_storage() {
            StageError::Storage(e.to_string())
        } else {
            StageError::UnavailableData(e.to_string())
        }
    }
}

impl From<StorageError> for StageError {
    fn from(e: StorageError) -> Self {
        StageError::Storage(e.to_string())
    }
}

// ── fetch ────────────────────────────────────────────────────────────

/// Pulls bars from the provider, canonicalizes them and keeps a raw copy.
pub struct FetchStage {
    provider: Arc<dyn DataProvider>,
    raw_store: RawStore,
    symbol: String,
    start: NaiveDate,
    end: NaiveDate,
}

impl FetchStage {
    pub fn new(
        provider: Arc<dyn DataProvider>,
        raw_store: RawStore,
        symbol: impl Into<String>,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            provider,
            raw_store,
            symbol: symbol.into(),
            start,
            end,
        }
    }
}

#[async_trait]
impl Executable<Artifact> for FetchStage {
    async fn execute(&self, _inputs: Inputs<Artifact>) -> Result<Artifact, StageError> {
        let fetched = self
            .provider
            .fetch(&self.symbol, self.start, self.end)
            .await?;
        debug!(provider = self.provider.name(), bars = fetched.bars.len(), "fetched");

        let series = PriceSeries::canonicalize(&self.symbol, fetched.bars);
        if series.is_empty() {
            return Err(StageError::UnavailableData(format!(
                "no bars for {} between {} and {}",
                self.symbol, self.start, self.end
            )));
        }
        if let Some(bar) = series.bars().iter().find(|b| b.is_void()) {
            return Err(StageError::UnavailableData(format!(
                "bar on {} has missing OHLC values",
                bar.date
            )));
        }

        let store = self.raw_store.clone();
        let (symbol, start, end, source) = (self.symbol.clone(), self.start, self.end, fetched.source);
        let bars = series.bars().to_vec();
        let path = tokio::task::spawn_blocking(move || store.write(&symbol, start, end, &bars, source))
            .await
            .map_err(|e| StageError::Internal(format!("raw store writer panicked: {e}")))??;

        info!(
            symbol = %self.symbol,
            bars = series.len(),
            first = ?series.first_date(),
            last = ?series.last_date(),
            raw = %path.display(),
            "prices fetched"
        );
        Ok(Artifact::Prices(series))
    }
}

// ── transform ────────────────────────────────────────────────────────

/// Computes every indicator column. Pure, runs on the blocking pool.
pub struct TransformStage {
    config: IndicatorConfig,
}

impl TransformStage {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Executable<Artifact> for TransformStage {
    async fn execute(&self, inputs: Inputs<Artifact>) -> Result<Artifact, StageError> {
        let upstream = inputs
            .get(FETCH)
            .cloned()
            .ok_or_else(|| StageError::MissingInput {
                task: inputs.task().to_string(),
                dependency: FETCH.to_string(),
            })?;
        if upstream.as_prices().is_none() {
            return Err(wrong_artifact(inputs.task(), FETCH, &upstream));
        }

        let config = self.config;
        let dataset = tokio::task::spawn_blocking(move || {
            upstream
                .as_prices()
                .map(|series| IndicatorDataset::compute(series, &config))
        })
        .await
        .map_err(|e| StageError::Internal(format!("indicator computation panicked: {e}")))?
        .ok_or_else(|| StageError::Internal("prices vanished from upstream artifact".into()))?;

        info!(rows = dataset.len(), "indicators computed");
        Ok(Artifact::Indicators(dataset))
    }
}

// ── validate ─────────────────────────────────────────────────────────

/// Gates the dataset on data-quality rules. Never mutates values.
pub struct ValidateStage;

#[async_trait]
impl Executable<Artifact> for ValidateStage {
    async fn execute(&self, inputs: Inputs<Artifact>) -> Result<Artifact, StageError> {
        let upstream = inputs.require(TRANSFORM)?;
        let dataset = upstream
            .as_indicators()
            .ok_or_else(|| wrong_artifact(inputs.task(), TRANSFORM, upstream))?;

        let validated = ValidatedDataset::check(dataset.clone())?;
        for warning in &validated.report.warnings {
            tracing::warn!(%warning, "data quality warning");
        }
        info!(
            data_points = validated.report.metrics.data_points,
            missing_pct = validated.report.metrics.missing_data_pct,
            "dataset validated"
        );
        Ok(Artifact::Validated(validated))
    }
}

// ── save ─────────────────────────────────────────────────────────────

/// Persists the validated dataset and its reports.
pub struct SaveStage {
    store: ProcessedStore,
    start: NaiveDate,
    end: NaiveDate,
}

impl SaveStage {
    pub fn new(store: ProcessedStore, start: NaiveDate, end: NaiveDate) -> Self {
        Self { store, start, end }
    }
}

#[async_trait]
impl Executable<Artifact> for SaveStage {
    async fn execute(&self, inputs: Inputs<Artifact>) -> Result<Artifact, StageError> {
        let upstream = inputs.require(VALIDATE)?;
        let validated = upstream
            .as_validated()
            .ok_or_else(|| wrong_artifact(inputs.task(), VALIDATE, upstream))?;

        let storage = self.store.save(validated, self.start, self.end).await?;
        info!(dir = %storage.dir.display(), "analysis saved");
        Ok(Artifact::Stored(storage))
    }
}
