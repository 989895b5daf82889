//! Scheduler facade
//!
//! `TaskScheduler` is what applications talk to. It validates and persists
//! task definitions, owns the task registry and forwards scheduling work to
//! the trigger engine running in the background.

use chrono::Utc;
use dashmap::DashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::audit::AuditLog;
use super::engine::{Command, SchedulerConfig, TriggerEngine};
use super::registry::TaskRegistry;
use super::schedule::Trigger;
use super::store::{CancelOutcome, TaskStore};
use super::types::{
    ExecutionRecord, NewTask, Priority, Result, SchedulerError, Task, TaskId, TaskStatus,
};

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    engine: JoinHandle<()>,
}

/// Background task scheduler
pub struct TaskScheduler {
    store: TaskStore,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    in_flight: Arc<DashSet<TaskId>>,
    running: Mutex<Option<Running>>,
}

impl TaskScheduler {
    /// Create a scheduler over an open store
    pub fn new(store: TaskStore, config: SchedulerConfig) -> Self {
        Self {
            store,
            registry: Arc::new(TaskRegistry::new()),
            config,
            in_flight: Arc::new(DashSet::new()),
            running: Mutex::new(None),
        }
    }

    /// Start building a scheduler
    pub fn builder() -> TaskSchedulerBuilder {
        TaskSchedulerBuilder::new()
    }

    /// Configuration in use
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// The registry job bodies are bound in
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Bind an async body to a task type
    pub fn register<F, Fut>(&self, task_type: impl Into<String>, body: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.registry.register(task_type, body);
    }

    /// Bind a synchronous body to a task type
    pub fn register_blocking<F>(&self, task_type: impl Into<String>, body: F)
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.registry.register_blocking(task_type, body);
    }

    /// Persist a new task and arm its schedule.
    ///
    /// The priority and task type are validated before anything is written.
    /// A schedule that does not parse is kept on the row but never armed;
    /// the task stays `pending` and can still be triggered manually.
    pub async fn add_task(&self, new: NewTask) -> Result<TaskId> {
        let priority: Priority = new.priority.parse()?;
        if new.task_type.trim().is_empty() {
            return Err(SchedulerError::Validation("task type must not be empty".to_string()));
        }

        let task = self
            .store
            .insert_task(
                &new.task_type,
                priority,
                new.schedule.as_deref(),
                new.max_retries,
                new.manual_only,
            )
            .await?;

        info!(
            task_id = task.id,
            task_type = %task.task_type,
            priority = %priority,
            "Added task"
        );

        if let Some(expression) = task.schedule.as_deref() {
            if task.manual_only {
                info!(task_id = task.id, "Task is manual-only, schedule not armed");
            } else {
                self.arm(&task, expression).await?;
            }
        }

        Ok(task.id)
    }

    async fn arm(&self, task: &Task, expression: &str) -> Result<()> {
        let now = Utc::now();
        let trigger = match Trigger::parse_with(expression, self.config.timezone, now) {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!(task_id = task.id, "Failed to schedule task: {}", e);
                return Ok(());
            }
        };
        let Some(due) = trigger.next_fire_after(now) else {
            warn!(task_id = task.id, schedule = %trigger, "Schedule never fires");
            return Ok(());
        };

        self.store.set_next_run_at(task.id, Some(due)).await?;

        // Before `start` the engine arms persisted rows itself.
        if let Some(running) = self.running.lock().await.as_ref() {
            let _ = running.commands.send(Command::Arm {
                task_id: task.id,
                trigger,
                priority: task.priority,
                due,
            });
        }
        Ok(())
    }

    /// Run a task now, outside its schedule.
    ///
    /// Returns false if the task does not exist, is already running, or is
    /// `completed` or `cancelled`.
    ///
    /// Attempts only run in the started scheduler's worker pool, so calling
    /// this before `start` (or after `shutdown`) fails with
    /// [`SchedulerError::NotRunning`] instead of returning false.
    pub async fn trigger_task(&self, task_id: TaskId) -> Result<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Trigger { task_id, reply }).await?;
        response.await.map_err(|_| SchedulerError::NotRunning)?
    }

    /// Cancel a task. Future firings are removed; a running attempt is not
    /// interrupted but its outcome no longer changes the status.
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<bool> {
        match self.store.cancel_task(task_id, Utc::now()).await? {
            CancelOutcome::Cancelled(task) => {
                info!(task_id, task_type = %task.task_type, "Cancelled task");
                if let Some(running) = self.running.lock().await.as_ref() {
                    let _ = running.commands.send(Command::Disarm { task_id });
                }
                Ok(true)
            }
            CancelOutcome::NotCancellable(status) => {
                info!(task_id, status = %status, "Task cannot be cancelled");
                Ok(false)
            }
            CancelOutcome::NotFound => Ok(false),
        }
    }

    /// Current state of a task
    pub async fn get_task_status(&self, task_id: TaskId) -> Result<Option<Task>> {
        self.store.get_task(task_id).await
    }

    /// All tasks ordered by ID, optionally filtered by status
    pub async fn get_all_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        self.store.list_tasks(status).await
    }

    /// Execution history of a task, oldest first
    pub async fn task_history(&self, task_id: TaskId) -> Result<Vec<ExecutionRecord>> {
        self.audit_log().history(task_id).await
    }

    /// Most recent executions across all tasks, newest first
    pub async fn recent_executions(&self, limit: i64) -> Result<Vec<ExecutionRecord>> {
        self.audit_log().recent(limit).await
    }

    /// Read access to the execution history
    pub fn audit_log(&self) -> AuditLog {
        self.store.audit_log()
    }

    /// IDs of tasks with an attempt queued or running
    pub fn running_tasks(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.in_flight.iter().map(|id| *id).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether an attempt of the task is queued or running
    pub fn is_running(&self, task_id: TaskId) -> bool {
        self.in_flight.contains(&task_id)
    }

    /// Whether `start` has been called and `shutdown` has not
    pub async fn is_started(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Restore persisted schedules and start the trigger engine
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }

        let shutdown = CancellationToken::new();
        let (commands, receiver) = mpsc::unbounded_channel();
        let mut engine = TriggerEngine::new(
            self.store.clone(),
            Arc::clone(&self.registry),
            self.config.clone(),
            Arc::clone(&self.in_flight),
            commands.clone(),
            shutdown.clone(),
        );
        if self.config.restore_on_start {
            engine.restore().await?;
        }

        let engine = tokio::spawn(engine.run(receiver, shutdown.clone()));
        *running = Some(Running {
            commands,
            shutdown,
            engine,
        });

        info!(
            max_concurrent = self.config.max_concurrent,
            timezone = %self.config.timezone,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop firing triggers and wait for running bodies to finish, up to the
    /// configured shutdown timeout. Calling it on a stopped scheduler is a
    /// no-op.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        info!("Scheduler shutting down");
        running.shutdown.cancel();
        if let Err(e) = running.engine.await {
            warn!("Trigger engine ended abnormally: {}", e);
        }
        info!("Scheduler stopped");
        Ok(())
    }

    async fn send(&self, command: Command) -> Result<()> {
        let running = self.running.lock().await;
        let running = running.as_ref().ok_or(SchedulerError::NotRunning)?;
        running
            .commands
            .send(command)
            .map_err(|_| SchedulerError::NotRunning)
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("config", &self.config)
            .field("task_types", &self.registry.task_types())
            .finish_non_exhaustive()
    }
}

/// Builder for creating a `TaskScheduler`
pub struct TaskSchedulerBuilder {
    store: Option<TaskStore>,
    config: SchedulerConfig,
}

impl TaskSchedulerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            store: None,
            config: SchedulerConfig::default(),
        }
    }

    /// Set the store
    pub fn store(mut self, store: TaskStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the configuration
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the scheduler
    pub fn build(self) -> Result<TaskScheduler> {
        let store = self
            .store
            .ok_or_else(|| SchedulerError::InvalidConfig("Store is required".to_string()))?;
        if self.config.max_concurrent == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrent must be at least 1".to_string(),
            ));
        }

        Ok(TaskScheduler::new(store, self.config))
    }
}

impl Default for TaskSchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
