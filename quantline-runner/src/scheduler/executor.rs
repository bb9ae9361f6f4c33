//! Scheduler: drives a TaskGraph to completion.
//!
//! One coordinating future owns all run state. Eligible tasks wait in a
//! priority-ordered ready queue; at most `max_workers` run at once, each on
//! its own tokio task. Completions flow back through a `JoinSet`, where the
//! coordinator records the outcome and unlocks dependents.
//!
//! Every attempt is spawned separately so a timeout can stop waiting and
//! abort it, and a panic in a stage surfaces as an `INTERNAL` failure rather
//! than tearing down the run.

use chrono::Utc;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::{StageError, TaskFailure};
use super::graph::TaskGraph;
use super::report::{ExecutionResult, RunReport, TaskStatus};
use super::task::{Executable, Inputs, Priority, RetryPolicy};

/// Progress callbacks. All methods default to no-ops.
pub trait RunObserver: Send + Sync {
    fn task_started(&self, _task: &str, _attempt_budget: u32) {}

    fn attempt_failed(&self, _task: &str, _attempt: u32, _error: &StageError) {}

    fn task_finished(&self, _task: &str, _status: TaskStatus, _attempts: u32) {}
}

pub struct Scheduler {
    max_workers: usize,
    observer: Option<Arc<dyn RunObserver>>,
}

/// What a worker hands back to the coordinator.
struct Outcome<T> {
    index: usize,
    attempts: u32,
    result: Result<Arc<T>, StageError>,
    failures: Vec<TaskFailure>,
    elapsed: Duration,
}

impl Scheduler {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Execute every task of `graph`. Always returns a complete report.
    pub async fn run<T>(&self, graph: &TaskGraph<T>) -> RunReport<T>
    where
        T: Send + Sync + 'static,
    {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let n = graph.len();
        info!(%run_id, tasks = n, workers = self.max_workers, "run started");

        let mut results: Vec<ExecutionResult<T>> = graph
            .tasks()
            .iter()
            .map(|t| ExecutionResult::pending(t.name()))
            .collect();
        let mut remaining: Vec<usize> = (0..n).map(|i| graph.dependencies_of(i).len()).collect();
        let mut ready: BinaryHeap<Reverse<(Priority, usize)>> = (0..n)
            .filter(|&i| remaining[i] == 0)
            .map(|i| Reverse((graph.tasks()[i].priority(), i)))
            .collect();
        let mut workers: JoinSet<Outcome<T>> = JoinSet::new();

        loop {
            while workers.len() < self.max_workers {
                let Some(Reverse((priority, i))) = ready.pop() else {
                    break;
                };
                if results[i].status != TaskStatus::Pending {
                    continue;
                }
                let task = &graph.tasks()[i];
                let inputs = match collect_inputs(graph, &results, i) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        // Only reachable if a dependency succeeded without output.
                        self.record_failure(graph, &mut results, i, 0, Vec::new(), e, Duration::ZERO);
                        continue;
                    }
                };

                debug!(task = task.name(), %priority, "dispatching");
                results[i].status = TaskStatus::Running;
                if let Some(obs) = &self.observer {
                    obs.task_started(task.name(), task.retry_policy().max_attempts);
                }
                workers.spawn(run_task(
                    i,
                    task.name().to_string(),
                    task.executable(),
                    task.retry_policy(),
                    task.timeout(),
                    inputs,
                    self.observer.clone(),
                ));
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Worker bodies do not panic; the finalization pass below
                    // accounts for any task left RUNNING.
                    error!(error = %e, "worker terminated abnormally");
                    continue;
                }
            };

            let i = outcome.index;
            match outcome.result {
                Ok(output) => {
                    let r = &mut results[i];
                    r.status = TaskStatus::Succeeded;
                    r.attempts = outcome.attempts;
                    r.attempt_failures = outcome.failures;
                    r.elapsed_ms = outcome.elapsed.as_millis() as u64;
                    r.output = Some(output);
                    info!(task = %r.task, attempts = r.attempts, elapsed_ms = r.elapsed_ms, "task succeeded");
                    if let Some(obs) = &self.observer {
                        obs.task_finished(&r.task, r.status, r.attempts);
                    }
                    for &d in graph.dependents_of(i) {
                        remaining[d] -= 1;
                        if remaining[d] == 0 && results[d].status == TaskStatus::Pending {
                            ready.push(Reverse((graph.tasks()[d].priority(), d)));
                        }
                    }
                }
                Err(e) => self.record_failure(
                    graph,
                    &mut results,
                    i,
                    outcome.attempts,
                    outcome.failures,
                    e,
                    outcome.elapsed,
                ),
            }
        }

        for r in results.iter_mut().filter(|r| !r.status.is_terminal()) {
            if r.status == TaskStatus::Running {
                let err = StageError::Internal("worker lost before reporting".into());
                r.status = TaskStatus::Failed;
                r.error = Some(TaskFailure::new(r.attempts, &err));
                r.cause = Some(err);
            } else {
                r.status = TaskStatus::Skipped;
            }
        }

        // Report in topological order.
        let mut slots: Vec<Option<ExecutionResult<T>>> = results.into_iter().map(Some).collect();
        let results: Vec<ExecutionResult<T>> = graph
            .order_indices()
            .iter()
            .filter_map(|&i| slots[i].take())
            .collect();

        let success = results.iter().all(|r| r.status == TaskStatus::Succeeded);
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            success,
            results,
        };
        info!(
            %run_id,
            success,
            succeeded = report.count(TaskStatus::Succeeded),
            failed = report.count(TaskStatus::Failed),
            skipped = report.count(TaskStatus::Skipped),
            "run finished"
        );
        report
    }

    /// Mark `i` failed and every transitive dependent skipped.
    #[allow(clippy::too_many_arguments)]
    fn record_failure<T>(
        &self,
        graph: &TaskGraph<T>,
        results: &mut [ExecutionResult<T>],
        i: usize,
        attempts: u32,
        failures: Vec<TaskFailure>,
        err: StageError,
        elapsed: Duration,
    ) {
        let r = &mut results[i];
        r.status = TaskStatus::Failed;
        r.attempts = attempts;
        r.attempt_failures = failures;
        r.error = Some(TaskFailure::new(attempts, &err));
        r.elapsed_ms = elapsed.as_millis() as u64;
        error!(task = %r.task, attempts, kind = %err.kind(), error = %err, "task failed");
        r.cause = Some(err);
        let failed_name = r.task.clone();
        if let Some(obs) = &self.observer {
            obs.task_finished(&failed_name, TaskStatus::Failed, attempts);
        }

        let mut queue: VecDeque<usize> = graph.dependents_of(i).iter().copied().collect();
        while let Some(d) = queue.pop_front() {
            if results[d].status != TaskStatus::Pending {
                continue;
            }
            results[d].status = TaskStatus::Skipped;
            results[d].skipped_because = Some(failed_name.clone());
            info!(task = %results[d].task, upstream = %failed_name, "task skipped");
            if let Some(obs) = &self.observer {
                obs.task_finished(&results[d].task, TaskStatus::Skipped, 0);
            }
            queue.extend(graph.dependents_of(d).iter().copied());
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(4)
    }
}

fn collect_inputs<T>(
    graph: &TaskGraph<T>,
    results: &[ExecutionResult<T>],
    i: usize,
) -> Result<Inputs<T>, StageError> {
    let name = graph.tasks()[i].name();
    let mut outputs = BTreeMap::new();
    for &d in graph.dependencies_of(i) {
        let dep = &results[d];
        let output = dep.output.clone().ok_or_else(|| StageError::MissingInput {
            task: name.to_string(),
            dependency: dep.task.clone(),
        })?;
        outputs.insert(dep.task.clone(), output);
    }
    Ok(Inputs::new(name, outputs))
}

/// All attempts of one task, sequentially.
async fn run_task<T>(
    index: usize,
    name: String,
    executable: Arc<dyn Executable<T>>,
    retry: RetryPolicy,
    timeout: Duration,
    inputs: Inputs<T>,
    observer: Option<Arc<dyn RunObserver>>,
) -> Outcome<T>
where
    T: Send + Sync + 'static,
{
    let started = Instant::now();
    let mut failures = Vec::new();

    if retry.max_attempts == 0 {
        return Outcome {
            index,
            attempts: 0,
            result: Err(StageError::NoAttempts),
            failures,
            elapsed: started.elapsed(),
        };
    }

    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        info!(task = %name, attempt, max_attempts = retry.max_attempts, "attempt started");

        let exec = Arc::clone(&executable);
        let attempt_inputs = inputs.clone();
        let handle = tokio::spawn(async move { exec.execute(attempt_inputs).await });
        let abort = handle.abort_handle();

        let outcome = match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StageError::Internal(format!("stage panicked: {join_err}"))),
            Err(_) => {
                abort.abort();
                Err(StageError::Timeout { after: timeout })
            }
        };

        match outcome {
            Ok(output) => break Ok(Arc::new(output)),
            Err(e) => {
                warn!(task = %name, attempt, kind = %e.kind(), error = %e, "attempt failed");
                if let Some(obs) = &observer {
                    obs.attempt_failed(&name, attempt, &e);
                }
                failures.push(TaskFailure::new(attempt, &e));

                if !e.is_retryable() || attempt >= retry.max_attempts {
                    break Err(e);
                }
                let delay = retry.backoff.delay(attempt);
                if !delay.is_zero() {
                    debug!(task = %name, delay_ms = delay.as_millis() as u64, "backing off");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    };

    Outcome {
        index,
        attempts: attempt,
        result,
        failures,
        elapsed: started.elapsed(),
    }
}
