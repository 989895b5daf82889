//! Executor pool
//!
//! A fixed number of long-lived workers pull jobs from a shared queue, so at
//! most `size` job bodies run at once and excess dispatches wait in line.
//! Each job is one attempt: mark the task running, invoke its body, and hand
//! the outcome to the retry controller through the store.

use chrono::Utc;
use futures::future::BoxFuture;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::registry::TaskRegistry;
use super::retry::{RunOrigin, Transition};
use super::store::{BeginOutcome, SettledRun, TaskStore};
use super::types::{Result, TaskId, TaskStatus};

/// Unit of work accepted by the pool
pub(crate) type Job = BoxFuture<'static, ()>;

/// Why an attempt failed. Always recorded, never propagated to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// No body is bound to the task type
    #[error("no function registered for task type: {0}")]
    NotRegistered(String),
    /// The body returned an error
    #[error("{0}")]
    Failed(String),
    /// The body panicked
    #[error("task body panicked: {0}")]
    Panicked(String),
}

/// Bounded pool of workers
pub(crate) struct ExecutorPool {
    sender: mpsc::UnboundedSender<Job>,
    workers: TaskTracker,
    shutdown: CancellationToken,
    size: usize,
}

impl ExecutorPool {
    /// Spawn `size` workers (at least one). Workers stop taking new jobs once
    /// `shutdown` is cancelled.
    pub(crate) fn new(size: usize, shutdown: CancellationToken) -> Self {
        let size = size.max(1);
        let (sender, receiver) = mpsc::unbounded_channel::<Job>();
        let queue = Arc::new(Mutex::new(receiver));
        let workers = TaskTracker::new();

        for worker_id in 0..size {
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                loop {
                    let job = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        job = async { queue.lock().await.recv().await } => job,
                    };
                    match job {
                        Some(job) => job.await,
                        None => break,
                    }
                }
                debug!(worker_id, "Executor worker stopped");
            });
        }
        workers.close();

        Self {
            sender,
            workers,
            shutdown,
            size,
        }
    }

    /// Queue a job. Returns false once the pool has stopped accepting work.
    pub(crate) fn submit(&self, job: Job) -> bool {
        !self.shutdown.is_cancelled() && self.sender.send(job).is_ok()
    }

    /// Number of workers
    pub(crate) fn size(&self) -> usize {
        self.size
    }

    /// Stop the workers and wait up to `timeout` for in-flight jobs. Jobs
    /// still queued are dropped. Returns whether every worker finished.
    pub(crate) async fn shutdown(self, timeout: Duration) -> bool {
        self.shutdown.cancel();
        drop(self.sender);

        match tokio::time::timeout(timeout, self.workers.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    "Timeout waiting for running tasks after {}s",
                    timeout.as_secs()
                );
                false
            }
        }
    }
}

/// What became of one dispatched attempt
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AttemptOutcome {
    /// The body ran and the outcome was settled
    Settled(SettledRun),
    /// The task was no longer in a runnable status
    Skipped(TaskStatus),
}

impl AttemptOutcome {
    /// Task status after the attempt
    pub(crate) fn status(&self) -> TaskStatus {
        match self {
            Self::Settled(run) => run.task.status,
            Self::Skipped(status) => *status,
        }
    }
}

/// Run one attempt of a task end to end
pub(crate) async fn run_attempt(
    store: &TaskStore,
    registry: &TaskRegistry,
    task_id: TaskId,
    origin: RunOrigin,
    logging_enabled: bool,
) -> Result<AttemptOutcome> {
    let task = match store.begin_run(task_id, origin, Utc::now()).await? {
        BeginOutcome::Started(task) => task,
        BeginOutcome::NotRunnable(status) => {
            debug!(task_id, status = %status, ?origin, "Task not runnable, skipping");
            return Ok(AttemptOutcome::Skipped(status));
        }
    };
    let started_at = task.last_run_at.unwrap_or(task.updated_at);

    if logging_enabled {
        info!(task_id, task_type = %task.task_type, ?origin, "Executing task");
    }

    let error = invoke(registry, &task.task_type).await.err();
    let message = error.as_ref().map(ToString::to_string);

    let settled = store
        .finish_run(task_id, started_at, message.as_deref(), Utc::now())
        .await?;

    match settled.transition {
        Transition::Succeeded if logging_enabled => {
            info!(task_id, task_type = %task.task_type, "Task completed");
        }
        Transition::Succeeded => {}
        Transition::Retrying => warn!(
            task_id,
            task_type = %task.task_type,
            retry_count = settled.task.retry_count,
            max_retries = settled.task.max_retries,
            "Task failed, will retry: {}",
            message.as_deref().unwrap_or_default()
        ),
        Transition::Exhausted => error!(
            task_id,
            task_type = %task.task_type,
            retry_count = settled.task.retry_count,
            "Task failed after exhausting retries: {}",
            message.as_deref().unwrap_or_default()
        ),
        Transition::KeptCancelled => info!(
            task_id,
            task_type = %task.task_type,
            "Task was cancelled while running"
        ),
    }

    Ok(AttemptOutcome::Settled(settled))
}

/// Invoke the body bound to `task_type`, containing errors and panics
async fn invoke(registry: &TaskRegistry, task_type: &str) -> std::result::Result<(), ExecutionError> {
    let body = registry
        .get(task_type)
        .ok_or_else(|| ExecutionError::NotRegistered(task_type.to_string()))?;

    match tokio::spawn(body()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ExecutionError::Failed(format!("{e:#}"))),
        Err(join) if join.is_panic() => Err(ExecutionError::Panicked(panic_message(join.into_panic()))),
        Err(join) => Err(ExecutionError::Failed(format!("task body aborted: {join}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
