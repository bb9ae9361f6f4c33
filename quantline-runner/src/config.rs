//! Pipeline configuration, loaded from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration.
//! The resolved value is passed explicitly to the stages; nothing reads
//! configuration from global state.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use quantline_core::indicators::{IndicatorConfig, IndicatorConfigError};

use crate::scheduler::{Backoff, Priority, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid analysis windows: {0}")]
    Analysis(#[from] IndicatorConfigError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub api: ApiConfig,
    pub data: DataConfig,
    pub pipeline: PipelineSettings,
    pub analysis: IndicatorConfig,
}

/// Where the read-only API serves the persisted output. Carried for the
/// consumers; the pipeline itself does not bind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8001,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub symbol: String,
    pub start_date: NaiveDate,
    /// Inclusive; today when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub raw_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub source: SourceConfig,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            symbol: "SPY".into(),
            start_date: NaiveDate::from_ymd_opt(2015, 1, 1).unwrap_or_default(),
            end_date: None,
            raw_dir: PathBuf::from("data/raw"),
            processed_dir: PathBuf::from("data/processed"),
            source: SourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    #[default]
    Yahoo,
    Synthetic,
    Csv {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    None,
    Fixed,
    #[default]
    Exponential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum attempts per stage, including the first.
    pub retries: u32,
    pub timeout_secs: u64,
    pub workers: usize,
    pub backoff: BackoffKind,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub priorities: StagePriorities,
    pub timeouts: StageTimeouts,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_secs: 60,
            workers: 4,
            backoff: BackoffKind::default(),
            backoff_base_ms: 1_000,
            backoff_max_ms: 30_000,
            priorities: StagePriorities::default(),
            timeouts: StageTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePriorities {
    pub fetch: Priority,
    pub transform: Priority,
    pub validate: Priority,
    pub save: Priority,
}

impl Default for StagePriorities {
    fn default() -> Self {
        Self {
            fetch: Priority::High,
            transform: Priority::Medium,
            validate: Priority::Medium,
            save: Priority::Low,
        }
    }
}

/// Per-stage timeout overrides in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageTimeouts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validate: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save: Option<u64>,
}

impl PipelineSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        let backoff = match self.backoff {
            BackoffKind::None => Backoff::None,
            BackoffKind::Fixed => Backoff::Fixed(Duration::from_millis(self.backoff_base_ms)),
            BackoffKind::Exponential => Backoff::Exponential {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_millis(self.backoff_max_ms),
            },
        };
        RetryPolicy::new(self.retries).with_backoff(backoff)
    }

    /// Timeout for `stage`, falling back to `timeout_secs`.
    pub fn timeout_for(&self, stage: &str) -> Duration {
        let specific = match stage {
            "fetch" => self.timeouts.fetch,
            "transform" => self.timeouts.transform,
            "validate" => self.timeouts.validate,
            "save" => self.timeouts.save,
            _ => None,
        };
        Duration::from_secs(specific.unwrap_or(self.timeout_secs))
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()?;

        if self.data.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("data.symbol must not be empty".into()));
        }
        if let Some(end) = self.data.end_date {
            if end < self.data.start_date {
                return Err(ConfigError::Invalid(format!(
                    "data.end_date {end} is before data.start_date {}",
                    self.data.start_date
                )));
            }
        }
        let p = &self.pipeline;
        if p.workers == 0 {
            return Err(ConfigError::Invalid("pipeline.workers must be >= 1".into()));
        }
        if p.timeout_secs == 0 {
            return Err(ConfigError::Invalid("pipeline.timeout_secs must be >= 1".into()));
        }
        let zero_override = [
            ("fetch", p.timeouts.fetch),
            ("transform", p.timeouts.transform),
            ("validate", p.timeouts.validate),
            ("save", p.timeouts.save),
        ]
        .into_iter()
        .find(|(_, t)| *t == Some(0));
        if let Some((stage, _)) = zero_override {
            return Err(ConfigError::Invalid(format!(
                "pipeline.timeouts.{stage} must be >= 1"
            )));
        }
        if p.backoff_max_ms < p.backoff_base_ms {
            return Err(ConfigError::Invalid(
                "pipeline.backoff_max_ms must be >= backoff_base_ms".into(),
            ));
        }
        Ok(())
    }

    /// End of the requested range: the configured date or `today`.
    pub fn end_date_or(&self, today: NaiveDate) -> NaiveDate {
        self.data.end_date.unwrap_or(today)
    }
}
