//! # Flow
//!
//! Dependency-ordered execution of named tasks.
//!
//! A [`Graph`] collects tasks; a task may only depend on tasks added before it,
//! so every compiled [`Flow`] is acyclic. Running a flow dispatches every task
//! whose dependencies have succeeded, bounded by `max_parallel`.
//!
//! - A failed task stops dispatching; tasks already running are awaited and
//!   the flow returns [`FlowError::Failed`] naming every failed task.
//! - Best-effort tasks log their failure and count as succeeded.
//! - Cancelling the token stops dispatching; running tasks receive a child
//!   token and are awaited.
//!
//! Progress is reported after every task transition.

mod stats;
mod task;

pub use stats::{Stats, EXECUTION_FINISHED};
pub use task::{RetryPolicy, Task, TaskContext, TaskId, TaskResult};

use crate::observability::metrics;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Receives the stats after every task transition
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, stats: &Stats) -> crate::error::Result<()>;
}

/// Clears previously recorded errors of a task once it succeeds
#[async_trait]
pub trait ErrorCleaner: Send + Sync {
    async fn clean(&self, task: &TaskId) -> crate::error::Result<()>;
}

/// A failed task and its error chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub task: TaskId,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("task {task} of flow {flow} is already defined")]
    DuplicateTask { flow: String, task: TaskId },

    #[error("task {task} of flow {flow} depends on unknown task {dependency}")]
    UnknownDependency {
        flow: String,
        task: TaskId,
        dependency: TaskId,
    },

    #[error("flow {flow} failed: {}", format_failures(.failures))]
    Failed {
        flow: String,
        failures: Vec<TaskFailure>,
        stats: Box<Stats>,
    },

    #[error("flow {flow} was cancelled")]
    Cancelled { flow: String, stats: Box<Stats> },
}

fn format_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("task {:?} failed: {}", f.task.as_str(), f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Tasks under construction
#[derive(Debug)]
pub struct Graph {
    name: String,
    tasks: BTreeMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Add a task whose dependencies are already part of the graph
    pub fn add(&mut self, task: Task) -> Result<TaskId, FlowError> {
        let id = task.id.clone();
        if self.tasks.contains_key(&id) {
            return Err(FlowError::DuplicateTask {
                flow: self.name.clone(),
                task: id,
            });
        }
        if let Some(dependency) = task
            .dependencies
            .iter()
            .find(|d| !self.tasks.contains_key(*d))
        {
            return Err(FlowError::UnknownDependency {
                flow: self.name.clone(),
                task: id,
                dependency: dependency.clone(),
            });
        }
        self.order.push(id.clone());
        self.tasks.insert(id.clone(), task);
        Ok(id)
    }

    pub fn compile(self) -> Flow {
        Flow {
            name: self.name,
            tasks: self.tasks,
            order: self.order,
        }
    }
}

/// Options for a single flow run
#[derive(Clone)]
pub struct Opts {
    pub max_parallel: usize,
    pub progress_reporter: Option<Arc<dyn ProgressReporter>>,
    pub error_cleaner: Option<Arc<dyn ErrorCleaner>>,
    pub cancel: CancellationToken,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            max_parallel: crate::constants::DEFAULT_MAX_PARALLEL_FLOW_TASKS,
            progress_reporter: None,
            error_cleaner: None,
            cancel: CancellationToken::new(),
        }
    }
}

impl std::fmt::Debug for Opts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Opts")
            .field("max_parallel", &self.max_parallel)
            .field("progress_reporter", &self.progress_reporter.is_some())
            .field("error_cleaner", &self.error_cleaner.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// A compiled, immutable task graph
#[derive(Debug)]
pub struct Flow {
    name: String,
    tasks: BTreeMap<TaskId, Task>,
    order: Vec<TaskId>,
}

impl Flow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn ready(&self, stats: &Stats) -> Vec<TaskId> {
        self.order
            .iter()
            .filter(|id| stats.pending.contains(*id))
            .filter(|id| {
                self.tasks[*id]
                    .dependencies
                    .iter()
                    .all(|d| stats.succeeded.contains(d))
            })
            .cloned()
            .collect()
    }

    async fn report(&self, opts: &Opts, stats: &Stats) {
        if let Some(reporter) = &opts.progress_reporter {
            if let Err(e) = reporter.report(stats).await {
                warn!(flow = %self.name, error = %e, "Failed to report flow progress");
            }
        }
    }

    pub async fn run(&self, opts: Opts) -> Result<Stats, FlowError> {
        let max_parallel = opts.max_parallel.max(1);
        let mut stats = Stats::new(self.name.clone(), self.order.iter().cloned());
        let mut running: JoinSet<(TaskId, TaskResult, f64)> = JoinSet::new();
        let mut failures: Vec<TaskFailure> = Vec::new();
        let mut spawned: HashMap<tokio::task::Id, TaskId> = HashMap::new();

        info!(flow = %self.name, tasks = self.tasks.len(), "Starting flow");

        loop {
            if failures.is_empty() && !opts.cancel.is_cancelled() {
                // Skipped tasks may unblock further tasks, so dispatch until nothing is ready
                loop {
                    let mut progressed = false;
                    for id in self.ready(&stats) {
                        if stats.running.len() >= max_parallel {
                            break;
                        }
                        let task = &self.tasks[&id];
                        if task.skip {
                            debug!(flow = %self.name, task = %id, "Skipping task");
                            stats.skip(&id);
                            self.report(&opts, &stats).await;
                            progressed = true;
                            continue;
                        }
                        stats.start(&id);
                        self.report(&opts, &stats).await;
                        let ctx = TaskContext {
                            id: id.clone(),
                            cancel: opts.cancel.child_token(),
                        };
                        let fut = task.invoke(ctx);
                        let span = tracing::info_span!("flow.task", flow = %self.name, task = %id);
                        let task_id = id.clone();
                        let handle = running.spawn(
                            async move {
                                let start = Instant::now();
                                let result = fut.await;
                                (task_id, result, start.elapsed().as_secs_f64())
                            }
                            .instrument(span),
                        );
                        spawned.insert(handle.id(), id);
                    }
                    if !progressed || stats.running.len() >= max_parallel {
                        break;
                    }
                }
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            let (id, result, elapsed) = match joined {
                Ok((handle_id, done)) => {
                    spawned.remove(&handle_id);
                    done
                }
                Err(join_error) => {
                    let Some(id) = spawned.remove(&join_error.id()) else {
                        continue;
                    };
                    error!(flow = %self.name, task = %id, error = %join_error, "Task panicked");
                    stats.fail(&id);
                    failures.push(TaskFailure {
                        task: id,
                        message: join_error.to_string(),
                    });
                    self.report(&opts, &stats).await;
                    continue;
                }
            };

            match result {
                Ok(()) => {
                    debug!(flow = %self.name, task = %id, elapsed, "Task succeeded");
                    metrics::observe_flow_task(&self.name, "succeeded", elapsed);
                    stats.succeed(&id);
                    if let Some(cleaner) = &opts.error_cleaner {
                        if let Err(e) = cleaner.clean(&id).await {
                            warn!(flow = %self.name, task = %id, error = %e, "Failed to clean task error");
                        }
                    }
                }
                Err(err) if self.tasks[&id].best_effort => {
                    warn!(flow = %self.name, task = %id, error = %format!("{err:#}"), "Best-effort task failed, continuing");
                    metrics::observe_flow_task(&self.name, "best_effort_failed", elapsed);
                    stats.succeed(&id);
                }
                Err(err) => {
                    error!(flow = %self.name, task = %id, error = %format!("{err:#}"), "Task failed");
                    metrics::observe_flow_task(&self.name, "failed", elapsed);
                    stats.fail(&id);
                    failures.push(TaskFailure {
                        task: id,
                        message: format!("{err:#}"),
                    });
                }
            }
            self.report(&opts, &stats).await;
        }

        if !failures.is_empty() {
            return Err(FlowError::Failed {
                flow: self.name.clone(),
                failures,
                stats: Box::new(stats),
            });
        }
        if !stats.pending.is_empty() {
            info!(flow = %self.name, pending = stats.pending.len(), "Flow cancelled");
            return Err(FlowError::Cancelled {
                flow: self.name.clone(),
                stats: Box::new(stats),
            });
        }
        info!(flow = %self.name, "Flow finished");
        Ok(stats)
    }
}
