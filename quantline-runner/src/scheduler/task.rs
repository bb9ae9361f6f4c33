//! Task definitions: plain data plus an executable capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::error::StageError;

/// Scheduling priority. Among eligible tasks `High` runs first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        };
        f.write_str(s)
    }
}

/// Delay between a failed attempt and the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backoff {
    #[default]
    None,
    Fixed(Duration),
    /// `base * 2^(attempt - 1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => d,
            Backoff::Exponential { base, max } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                base.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on executions, including the first. Zero means the task
    /// fails without being invoked.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::None,
        }
    }

    /// A single attempt, no retries.
    pub fn once() -> Self {
        Self::new(1)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(1),
                max: Duration::from_secs(30),
            },
        }
    }
}

/// Outputs of a task's direct dependencies, keyed by task name.
pub struct Inputs<T> {
    task: String,
    outputs: BTreeMap<String, Arc<T>>,
}

impl<T> Inputs<T> {
    pub fn new(task: impl Into<String>, outputs: BTreeMap<String, Arc<T>>) -> Self {
        Self {
            task: task.into(),
            outputs,
        }
    }

    pub fn empty(task: impl Into<String>) -> Self {
        Self::new(task, BTreeMap::new())
    }

    /// Name of the task receiving these inputs.
    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn get(&self, dependency: &str) -> Option<&Arc<T>> {
        self.outputs.get(dependency)
    }

    /// Output of `dependency`, or an internal error if the graph did not
    /// wire it.
    pub fn require(&self, dependency: &str) -> Result<&T, StageError> {
        self.outputs
            .get(dependency)
            .map(Arc::as_ref)
            .ok_or_else(|| StageError::MissingInput {
                task: self.task.clone(),
                dependency: dependency.to_string(),
            })
    }
}

impl<T> Clone for Inputs<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// The unit of work behind a task. Called once per attempt with the same
/// inputs each time.
#[async_trait]
pub trait Executable<T>: Send + Sync {
    async fn execute(&self, inputs: Inputs<T>) -> Result<T, StageError>;
}

/// Adapts an async closure into an [`Executable`].
pub struct FnExecutable<F>(pub F);

#[async_trait]
impl<T, F, Fut> Executable<T> for FnExecutable<F>
where
    T: Send + Sync + 'static,
    F: Fn(Inputs<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, StageError>> + Send + 'static,
{
    async fn execute(&self, inputs: Inputs<T>) -> Result<T, StageError> {
        (self.0)(inputs).await
    }
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A node of the task graph.
pub struct Task<T> {
    name: String,
    dependencies: Vec<String>,
    priority: Priority,
    retry: RetryPolicy,
    timeout: Duration,
    executable: Arc<dyn Executable<T>>,
}

impl<T: Send + Sync + 'static> Task<T> {
    pub fn new(name: impl Into<String>, executable: Arc<dyn Executable<T>>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            priority: Priority::default(),
            retry: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            executable,
        }
    }

    pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Inputs<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, StageError>> + Send + 'static,
    {
        Self::new(name, Arc::new(FnExecutable(f)))
    }
}

impl<T> Task<T> {
    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn executable(&self) -> Arc<dyn Executable<T>> {
        Arc::clone(&self.executable)
    }

    /// Drop repeated dependency names, keeping first occurrence order.
    pub(crate) fn dedup_dependencies(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.dependencies.retain(|d| seen.insert(d.clone()));
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("priority", &self.priority)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_high_first() {
        let mut ps = vec![Priority::Low, Priority::High, Priority::Medium];
        ps.sort();
        assert_eq!(ps, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let b = Backoff::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(350),
        };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(350));
        assert_eq!(b.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn fixed_and_none_backoff() {
        assert_eq!(Backoff::None.delay(5), Duration::ZERO);
        assert_eq!(
            Backoff::Fixed(Duration::from_millis(7)).delay(3),
            Duration::from_millis(7)
        );
    }

    #[test]
    fn require_reports_missing_dependency() {
        let inputs: Inputs<u32> = Inputs::empty("transform");
        match inputs.require("fetch") {
            Err(StageError::MissingInput { task, dependency }) => {
                assert_eq!(task, "transform");
                assert_eq!(dependency, "fetch");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closures_are_executable() {
        let task: Task<u32> = Task::from_fn("answer", |_inputs| async { Ok(42) });
        let out = task.executable().execute(Inputs::empty("answer")).await;
        assert_eq!(out.unwrap(), 42);
    }

    #[test]
    fn builder_dedups_dependencies() {
        let mut task: Task<u32> = Task::from_fn("t", |_| async { Ok(1) })
            .depends_on("a")
            .depends_on("b")
            .depends_on("a");
        task.dedup_dependencies();
        assert_eq!(task.dependencies(), ["a".to_string(), "b".to_string()]);
    }
}
