//! Flow tasks: a named async unit of work plus its scheduling attributes.

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Identifier of a task within a flow; the task's name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(name: &str) -> Self {
        TaskId::new(name)
    }
}

/// Passed to every task invocation
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub id: TaskId,
    /// Cancelled when the flow is cancelled; tasks should stop cooperatively
    pub cancel: CancellationToken,
}

pub type TaskResult = anyhow::Result<()>;

type TaskFn = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Retry a failing task at a fixed interval until a deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) func: TaskFn,
    pub(crate) dependencies: Vec<TaskId>,
    pub(crate) skip: bool,
    pub(crate) best_effort: bool,
    pub(crate) retry: Option<RetryPolicy>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("dependencies", &self.dependencies)
            .field("skip", &self.skip)
            .field("best_effort", &self.best_effort)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        Self {
            id: TaskId::new(name),
            func: Arc::new(move |ctx| -> BoxFuture<'static, TaskResult> { Box::pin(func(ctx)) }),
            dependencies: Vec::new(),
            skip: false,
            best_effort: false,
            retry: None,
        }
    }

    /// Task that does nothing; useful as a synchronization point
    pub fn noop(name: impl Into<String>) -> Self {
        Self::new(name, |_| async { Ok(()) })
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn depends_on(mut self, dependencies: &[&TaskId]) -> Self {
        self.dependencies
            .extend(dependencies.iter().map(|id| (*id).clone()));
        self
    }

    /// Skipped tasks complete immediately without running
    pub fn skip_if(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    /// Only run when `condition` holds
    pub fn do_if(self, condition: bool) -> Self {
        self.skip_if(!condition)
    }

    /// Failures are logged and the flow continues as if the task succeeded
    pub fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    pub fn retry_until_timeout(mut self, interval: Duration, timeout: Duration) -> Self {
        self.retry = Some(RetryPolicy { interval, timeout });
        self
    }

    pub(crate) fn invoke(&self, ctx: TaskContext) -> BoxFuture<'static, TaskResult> {
        let func = Arc::clone(&self.func);
        let retry = self.retry;
        Box::pin(async move {
            match retry {
                None => func(ctx).await,
                Some(policy) => retry_until_timeout(func, ctx, policy).await,
            }
        })
    }
}

async fn retry_until_timeout(func: TaskFn, ctx: TaskContext, policy: RetryPolicy) -> TaskResult {
    let deadline = tokio::time::Instant::now() + policy.timeout;
    let mut attempt = 1u32;
    loop {
        let err = match func(ctx.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        if tokio::time::Instant::now() + policy.interval > deadline {
            return Err(err.context(format!(
                "task {} did not succeed within {:?}",
                ctx.id, policy.timeout
            )));
        }
        warn!(
            task = %ctx.id,
            attempt,
            error = %err,
            retry_in_ms = policy.interval.as_millis() as u64,
            "Task failed, retrying"
        );
        tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(err.context(format!("task {} cancelled", ctx.id))),
            _ = tokio::time::sleep(policy.interval) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ctx(name: &str) -> TaskContext {
        TaskContext {
            id: TaskId::new(name),
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = Task::new("wait", move |_| {
            let counter = Arc::clone(&counter);
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not ready yet");
                }
                Ok(())
            }
        })
        .retry_until_timeout(Duration::from_secs(1), Duration::from_secs(10));

        task.invoke(ctx("wait")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_timeout() {
        let task = Task::new("wait", |_| async { Err::<(), _>(anyhow::anyhow!("never ready")) })
            .retry_until_timeout(Duration::from_secs(2), Duration::from_secs(5));
        let err = task.invoke(ctx("wait")).await.unwrap_err();
        assert!(format!("{err:#}").contains("never ready"));
    }

    #[test]
    fn test_do_if_false_skips() {
        let task = Task::noop("dns").do_if(false);
        assert!(task.skip);
    }
}
