//! Quantline Runner: scheduling and running the market-data pipeline.
//!
//! This crate builds on `quantline-core` to provide:
//! - A dependency-aware task scheduler with priorities, retries, timeouts
//!   and failure propagation
//! - The four pipeline stages (fetch, transform, validate, save)
//! - TOML configuration
//! - Processed-output storage and run reports

pub mod config;
pub mod pipeline;
pub mod scheduler;
pub mod stages;
pub mod storage;

pub use config::{ConfigError, DataConfig, PipelineConfig, PipelineSettings, SourceConfig};
pub use pipeline::{provider_for, PipelineError, PipelineOutcome, PipelineRunner};
pub use scheduler::{
    DependencyError, ErrorKind, ExecutionResult, Priority, RetryPolicy, RunObserver, RunReport,
    Scheduler, StageError, Task, TaskGraph, TaskStatus,
};
pub use stages::{Artifact, FETCH, SAVE, TRANSFORM, VALIDATE};
pub use storage::{ProcessedStore, StorageError, StorageRef};
