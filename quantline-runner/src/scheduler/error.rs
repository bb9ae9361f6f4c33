//! Error types for graph construction and stage execution.

use quantline_core::validate::DataQualityError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Graph construction failures. Fatal: nothing executes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DependencyError {
    #[error("task '{name}' is declared more than once")]
    DuplicateTask { name: String },

    #[error("task '{task}' depends on itself")]
    SelfDependency { task: String },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    MissingDependency { task: String, dependency: String },

    #[error("dependency cycle: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },
}

/// Why a single attempt of a stage failed.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("network error: {0}")]
    Network(String),

    #[error("data unavailable: {0}")]
    UnavailableData(String),

    #[error("timed out after {}ms", after.as_millis())]
    Timeout { after: Duration },

    #[error("data quality: {0}")]
    DataQuality(#[from] DataQualityError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("task '{task}' has no output from dependency '{dependency}'")]
    MissingInput { task: String, dependency: String },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("retry budget allows no attempts")]
    NoAttempts,
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Network(_) => ErrorKind::Network,
            StageError::UnavailableData(_) => ErrorKind::UnavailableData,
            StageError::Timeout { .. } => ErrorKind::Timeout,
            StageError::DataQuality(_) => ErrorKind::DataQuality,
            StageError::Storage(_) => ErrorKind::Storage,
            StageError::MissingInput { .. } | StageError::Internal(_) => ErrorKind::Internal,
            StageError::NoAttempts => ErrorKind::NoAttempts,
        }
    }

    /// Whether another attempt with the same inputs could succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

/// Stable, serializable classification of a [`StageError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Network,
    UnavailableData,
    Timeout,
    DataQuality,
    Storage,
    Internal,
    NoAttempts,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Network | ErrorKind::UnavailableData | ErrorKind::Timeout | ErrorKind::Storage
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK",
            ErrorKind::UnavailableData => "UNAVAILABLE_DATA",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::DataQuality => "DATA_QUALITY",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::NoAttempts => "NO_ATTEMPTS",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded attempt failure, as persisted in the run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub attempt: u32,
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(attempt: u32, error: &StageError) -> Self {
        Self {
            attempt,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(StageError::Network("reset".into()).is_retryable());
        assert!(StageError::Timeout {
            after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(StageError::Storage("disk full".into()).is_retryable());
        assert!(!StageError::Internal("bug".into()).is_retryable());
        assert!(!StageError::NoAttempts.is_retryable());
    }

    #[test]
    fn kind_serializes_screaming() {
        let json = serde_json::to_string(&ErrorKind::UnavailableData).unwrap();
        assert_eq!(json, "\"UNAVAILABLE_DATA\"");
        assert_eq!(ErrorKind::DataQuality.to_string(), "DATA_QUALITY");
    }

    #[test]
    fn cycle_message_lists_path() {
        let err = DependencyError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }
}
