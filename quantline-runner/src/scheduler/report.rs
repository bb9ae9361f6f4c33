//! Per-task results and the run report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::error::{StageError, TaskFailure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeeded => "SUCCEEDED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Outcome of one task within a run.
///
/// `output` is present iff the task succeeded and `error` iff it failed.
/// Outputs are not persisted; the rest of the record is.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct ExecutionResult<T> {
    pub task: String,
    pub status: TaskStatus,
    pub attempts: u32,
    pub error: Option<TaskFailure>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempt_failures: Vec<TaskFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_because: Option<String>,
    pub elapsed_ms: u64,
    #[serde(skip)]
    pub output: Option<Arc<T>>,
    /// Typed form of `error`, available in-process only.
    #[serde(skip)]
    pub cause: Option<StageError>,
}

impl<T> ExecutionResult<T> {
    pub fn pending(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            error: None,
            attempt_failures: Vec::new(),
            skipped_because: None,
            elapsed_ms: 0,
            output: None,
            cause: None,
        }
    }
}

impl<T> Clone for ExecutionResult<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            status: self.status,
            attempts: self.attempts,
            error: self.error.clone(),
            attempt_failures: self.attempt_failures.clone(),
            skipped_because: self.skipped_because.clone(),
            elapsed_ms: self.elapsed_ms,
            output: self.output.clone(),
            cause: self.cause.clone(),
        }
    }
}

/// Complete record of one scheduler run. Covers every task exactly once,
/// in topological order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct RunReport<T> {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub results: Vec<ExecutionResult<T>>,
}

/// A run report read back from disk, without outputs.
pub type PersistedRunReport = RunReport<()>;

impl<T> RunReport<T> {
    pub fn get(&self, task: &str) -> Option<&ExecutionResult<T>> {
        self.results.iter().find(|r| r.task == task)
    }

    pub fn output(&self, task: &str) -> Option<&Arc<T>> {
        self.get(task).and_then(|r| r.output.as_ref())
    }

    /// First failed task in dependency order.
    pub fn first_failure(&self) -> Option<&ExecutionResult<T>> {
        self.results
            .iter()
            .find(|r| r.status == TaskStatus::Failed)
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }

    /// One line per task, for terminal output.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "run {} {} ({} succeeded, {} failed, {} skipped, {}ms)\n",
            self.run_id,
            if self.success { "SUCCEEDED" } else { "FAILED" },
            self.count(TaskStatus::Succeeded),
            self.count(TaskStatus::Failed),
            self.count(TaskStatus::Skipped),
            self.duration_ms(),
        );
        for r in &self.results {
            out.push_str(&format!(
                "  {:<12} {:<9} attempts={} {}ms",
                r.task, r.status, r.attempts, r.elapsed_ms
            ));
            if let Some(err) = &r.error {
                out.push_str(&format!("  {err}"));
            }
            if let Some(parent) = &r.skipped_because {
                out.push_str(&format!("  (upstream '{parent}' failed)"));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::error::ErrorKind;

    fn report() -> RunReport<u32> {
        let mut fetch = ExecutionResult::pending("fetch");
        fetch.status = TaskStatus::Succeeded;
        fetch.attempts = 1;
        fetch.output = Some(Arc::new(7));

        let mut transform = ExecutionResult::pending("transform");
        transform.status = TaskStatus::Failed;
        transform.attempts = 1;
        transform.error = Some(TaskFailure {
            attempt: 1,
            kind: ErrorKind::Internal,
            message: "boom".into(),
        });

        let mut save = ExecutionResult::pending("save");
        save.status = TaskStatus::Skipped;
        save.skipped_because = Some("transform".into());

        let now = Utc::now();
        RunReport {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            success: false,
            results: vec![fetch, transform, save],
        }
    }

    #[test]
    fn lookup_helpers() {
        let r = report();
        assert_eq!(r.output("fetch").map(|v| **v), Some(7));
        assert_eq!(r.first_failure().unwrap().task, "transform");
        assert_eq!(r.count(TaskStatus::Skipped), 1);
        assert!(r.summary().contains("upstream 'transform' failed"));
    }

    #[test]
    fn only_pending_and_running_are_open() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        for status in [TaskStatus::Succeeded, TaskStatus::Failed, TaskStatus::Skipped] {
            assert!(status.is_terminal(), "{status}");
        }
    }

    #[test]
    fn persisted_form_drops_outputs() {
        let json = serde_json::to_string(&report()).unwrap();
        assert!(json.contains("\"status\":\"SKIPPED\""));
        assert!(!json.contains("output"));

        let back: PersistedRunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.results.len(), 3);
        assert_eq!(back.results[1].error.as_ref().unwrap().kind, ErrorKind::Internal);
        assert!(back.results[0].output.is_none());
    }
}
