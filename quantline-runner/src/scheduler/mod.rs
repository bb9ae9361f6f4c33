//! Dependency-aware task scheduler.
//!
//! ```text
//! Vec<Task<T>>
//!   ↓
//! TaskGraph::new()  → DependencyError on duplicate / self / missing / cycle
//!   ↓
//! Scheduler::run()  → priority ready queue, bounded workers,
//!                     per-attempt timeout, retry with backoff,
//!                     downstream skip on failure
//!   ↓
//! RunReport<T>
//! ```

pub mod error;
pub mod executor;
pub mod graph;
pub mod report;
pub mod task;

pub use error::{DependencyError, ErrorKind, StageError, TaskFailure};
pub use executor::{RunObserver, Scheduler};
pub use graph::TaskGraph;
pub use report::{ExecutionResult, PersistedRunReport, RunReport, TaskStatus};
pub use task::{
    Backoff, Executable, FnExecutable, Inputs, Priority, RetryPolicy, Task, DEFAULT_TIMEOUT,
};
