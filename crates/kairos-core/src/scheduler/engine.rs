//! Trigger engine
//!
//! The single decision-making loop of the scheduler. It owns every armed
//! trigger, keeps them in a min-heap keyed by next fire time and hands due
//! tasks to the executor pool. All dispatch decisions are made here, so two
//! attempts of one task never overlap:
//! - a firing that comes due while the task is still running is folded into
//!   one catch-up run after the current attempt settles
//! - missed occurrences are coalesced, the trigger always advances to its
//!   next instant after "now"

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use dashmap::DashSet;
use futures::FutureExt;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{self, ExecutorPool};
use super::registry::TaskRegistry;
use super::retry::{self, RunOrigin};
use super::schedule::Trigger;
use super::store::{self, TaskStore};
use super::types::{Priority, Result, Task, TaskId, TaskStatus};

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Longest the loop sleeps without re-checking its triggers, in seconds
    pub check_interval_secs: u64,
    /// Delay before re-firing a scheduled task that failed with retries
    /// left. Zero waits for the next scheduled occurrence.
    pub retry_delay_secs: u64,
    /// Executor pool size
    pub max_concurrent: usize,
    /// How long `shutdown` waits for running bodies, in seconds
    pub shutdown_timeout_secs: u64,
    /// Log every execution at info level
    pub logging_enabled: bool,
    /// Timezone cron expressions are evaluated in
    pub timezone: Tz,
    /// Recover interrupted rows and arm persisted schedules on `start`
    pub restore_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            retry_delay_secs: 0,
            max_concurrent: 10,
            shutdown_timeout_secs: 30,
            logging_enabled: true,
            timezone: Tz::UTC,
            restore_on_start: true,
        }
    }
}

impl SchedulerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set check interval
    pub fn with_check_interval(mut self, secs: u64) -> Self {
        self.check_interval_secs = secs;
        self
    }

    /// Set retry delay
    pub fn with_retry_delay(mut self, secs: u64) -> Self {
        self.retry_delay_secs = secs;
        self
    }

    /// Set max concurrent executions
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Set shutdown timeout
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    /// Enable or disable per-execution logging
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging_enabled = enabled;
        self
    }

    /// Set the cron timezone
    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Enable or disable restoring persisted state on start
    pub fn with_restore_on_start(mut self, enabled: bool) -> Self {
        self.restore_on_start = enabled;
        self
    }

    fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs.max(1))
    }
}

/// Requests handled by the engine loop
pub(crate) enum Command {
    /// Start firing a trigger, first at `due`
    Arm {
        task_id: TaskId,
        trigger: Trigger,
        priority: Priority,
        due: DateTime<Utc>,
    },
    /// Stop firing a task
    Disarm { task_id: TaskId },
    /// Run a task now, outside its schedule
    Trigger {
        task_id: TaskId,
        reply: oneshot::Sender<Result<bool>>,
    },
    /// An attempt left the pool
    Finished {
        task_id: TaskId,
        status: Option<TaskStatus>,
    },
}

struct Armed {
    trigger: Trigger,
    priority: Priority,
    next: DateTime<Utc>,
    generation: u64,
}

/// Heap entries are `(due, generation, task_id)`. An entry is live only
/// while its generation matches the armed trigger's.
type HeapEntry = Reverse<(DateTime<Utc>, u64, TaskId)>;

/// Reports an attempt back to the engine when dropped, whether the job ran
/// to the end or was discarded from the queue unstarted.
struct Completion {
    task_id: TaskId,
    status: Option<TaskStatus>,
    in_flight: Arc<DashSet<TaskId>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for Completion {
    fn drop(&mut self) {
        let finished = Command::Finished {
            task_id: self.task_id,
            status: self.status,
        };
        // Engine is gone; nobody else will clear the entry.
        if self.commands.send(finished).is_err() {
            self.in_flight.remove(&self.task_id);
        }
    }
}

/// The scheduling loop
pub(crate) struct TriggerEngine {
    store: TaskStore,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    pool: ExecutorPool,
    in_flight: Arc<DashSet<TaskId>>,
    commands: mpsc::UnboundedSender<Command>,
    armed: HashMap<TaskId, Armed>,
    heap: BinaryHeap<HeapEntry>,
    catch_up: HashSet<TaskId>,
    generation: u64,
}

impl TriggerEngine {
    pub(crate) fn new(
        store: TaskStore,
        registry: Arc<TaskRegistry>,
        config: SchedulerConfig,
        in_flight: Arc<DashSet<TaskId>>,
        commands: mpsc::UnboundedSender<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        let pool = ExecutorPool::new(config.max_concurrent, shutdown.child_token());
        Self {
            store,
            registry,
            config,
            pool,
            in_flight,
            commands,
            armed: HashMap::new(),
            heap: BinaryHeap::new(),
            catch_up: HashSet::new(),
            generation: 0,
        }
    }

    /// Rebuild scheduling state from the store: rows interrupted mid-run go
    /// back to `pending` and every schedulable task is armed. A persisted
    /// `next_run_at` in the past fires once on the first tick.
    pub(crate) async fn restore(&mut self) -> Result<()> {
        let now = Utc::now();

        let recovered = self.store.recover_interrupted(now).await?;
        if !recovered.is_empty() {
            warn!(
                "Recovered {} task(s) interrupted by a previous shutdown: {:?}",
                recovered.len(),
                recovered
            );
        }

        for task in self.store.list_schedulable().await? {
            self.arm_task(&task, now).await?;
        }

        info!("Initialized {} scheduled tasks", self.armed.len());
        Ok(())
    }

    /// Arm a persisted task if it is schedulable. Uses the stored
    /// `next_run_at` when present.
    async fn arm_task(&mut self, task: &Task, now: DateTime<Utc>) -> Result<bool> {
        if !store::is_armable(task) {
            return Ok(false);
        }
        let Some(expression) = task.schedule.as_deref() else {
            return Ok(false);
        };
        let trigger = match Trigger::parse_with(expression, self.config.timezone, now) {
            Ok(trigger) => trigger,
            Err(e) => {
                warn!(task_id = task.id, "Not arming task with invalid schedule: {}", e);
                return Ok(false);
            }
        };

        let due = match task.next_run_at {
            Some(due) => due,
            None => match trigger.next_fire_after(now) {
                Some(due) => {
                    self.store.set_next_run_at(task.id, Some(due)).await?;
                    due
                }
                None => return Ok(false),
            },
        };
        self.arm(task.id, trigger, task.priority, due);
        Ok(true)
    }

    /// Run until `shutdown` is cancelled, then drain the executor pool
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) {
        info!(workers = self.pool.size(), "Trigger engine starting");

        loop {
            let sleep_for = self.time_until_next(Utc::now());

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Trigger engine shutting down");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = tokio::time::sleep(sleep_for) => {}
            }

            self.fire_due(Utc::now()).await;
        }

        let timeout = Duration::from_secs(self.config.shutdown_timeout_secs);
        self.pool.shutdown(timeout).await;

        // Attempts that ended during the drain. Ones still running report
        // to the closed channel and clear themselves.
        commands.close();
        while let Ok(command) = commands.try_recv() {
            if let Command::Finished { task_id, .. } = command {
                self.in_flight.remove(&task_id);
            }
        }

        info!("Trigger engine stopped");
    }

    fn time_until_next(&self, now: DateTime<Utc>) -> Duration {
        let cap = self.config.check_interval();
        match self.heap.peek() {
            Some(Reverse((due, _, _))) => (*due - now).to_std().unwrap_or(Duration::ZERO).min(cap),
            None => cap,
        }
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Arm {
                task_id,
                trigger,
                priority,
                due,
            } => {
                debug!(task_id, schedule = %trigger, %due, "Arming trigger");
                self.arm(task_id, trigger, priority, due);
            }
            Command::Disarm { task_id } => {
                if self.armed.remove(&task_id).is_some() {
                    debug!(task_id, "Disarmed trigger");
                }
                self.catch_up.remove(&task_id);
            }
            Command::Trigger { task_id, reply } => {
                let result = self.trigger_now(task_id).await;
                let _ = reply.send(result);
            }
            Command::Finished { task_id, status } => self.on_finished(task_id, status).await,
        }
    }

    fn arm(&mut self, task_id: TaskId, trigger: Trigger, priority: Priority, due: DateTime<Utc>) {
        self.generation += 1;
        self.armed.insert(
            task_id,
            Armed {
                trigger,
                priority,
                next: due,
                generation: self.generation,
            },
        );
        self.heap.push(Reverse((due, self.generation, task_id)));
    }

    /// Move an armed task's next firing, invalidating its old heap entry
    fn reschedule(&mut self, task_id: TaskId, due: DateTime<Utc>) {
        self.generation += 1;
        if let Some(armed) = self.armed.get_mut(&task_id) {
            armed.next = due;
            armed.generation = self.generation;
            self.heap.push(Reverse((due, self.generation, task_id)));
        }
    }

    async fn fire_due(&mut self, now: DateTime<Utc>) {
        let mut due = Vec::new();
        while let Some(Reverse((at, generation, task_id))) = self.heap.peek().copied() {
            if at > now {
                break;
            }
            self.heap.pop();
            match self.armed.get(&task_id) {
                Some(armed) if armed.generation == generation => {
                    due.push((armed.priority, at, task_id));
                }
                _ => {}
            }
        }

        if due.is_empty() {
            return;
        }

        // Highest priority first, then earliest due
        due.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        debug!("{} trigger(s) due", due.len());

        for (_, _, task_id) in due {
            self.advance(task_id, now).await;

            if self.in_flight.contains(&task_id) {
                debug!(task_id, "Task still running, coalescing firing");
                self.catch_up.insert(task_id);
                continue;
            }
            self.dispatch(task_id, RunOrigin::Schedule);
        }
    }

    /// Advance a fired trigger to its next instant after `now` and persist it
    async fn advance(&mut self, task_id: TaskId, now: DateTime<Utc>) {
        let next = self
            .armed
            .get(&task_id)
            .and_then(|armed| armed.trigger.next_fire_after(now));

        match next {
            Some(next) => self.reschedule(task_id, next),
            None => {
                info!(task_id, "Schedule has no further occurrences");
                self.armed.remove(&task_id);
            }
        }

        if let Err(e) = self.store.set_next_run_at(task_id, next).await {
            error!(task_id, "Failed to persist next run time: {}", e);
        }
    }

    async fn trigger_now(&mut self, task_id: TaskId) -> Result<bool> {
        if self.in_flight.contains(&task_id) {
            debug!(task_id, "Manual trigger ignored, task already running");
            return Ok(false);
        }

        let Some(task) = self.store.get_task(task_id).await? else {
            return Ok(false);
        };
        if !retry::can_begin(task.status, RunOrigin::Manual) {
            debug!(task_id, status = %task.status, "Manual trigger ignored");
            return Ok(false);
        }

        Ok(self.dispatch(task_id, RunOrigin::Manual))
    }

    async fn on_finished(&mut self, task_id: TaskId, status: Option<TaskStatus>) {
        self.in_flight.remove(&task_id);

        match status {
            Some(TaskStatus::Failed | TaskStatus::Cancelled) => {
                if self.armed.remove(&task_id).is_some() {
                    debug!(task_id, "Disarmed trigger after terminal status");
                }
                self.catch_up.remove(&task_id);
                if let Err(e) = self.store.set_next_run_at(task_id, None).await {
                    error!(task_id, "Failed to clear next run time: {}", e);
                }
                return;
            }
            Some(TaskStatus::Pending) if self.config.retry_delay_secs > 0 => {
                let retry_at = chrono::Duration::from_std(Duration::from_secs(
                    self.config.retry_delay_secs,
                ))
                .ok()
                .and_then(|delay| Utc::now().checked_add_signed(delay));
                let next = self.armed.get(&task_id).map(|a| a.next);

                match (retry_at, next) {
                    (Some(retry_at), Some(next)) if retry_at < next => {
                        debug!(task_id, %retry_at, "Scheduling retry");
                        self.reschedule(task_id, retry_at);
                        if let Err(e) = self.store.set_next_run_at(task_id, Some(retry_at)).await {
                            error!(task_id, "Failed to persist retry time: {}", e);
                        }
                    }
                    (None, _) => warn!(
                        task_id,
                        retry_delay_secs = self.config.retry_delay_secs,
                        "Retry delay out of range, waiting for the next occurrence"
                    ),
                    _ => {}
                }
            }
            // A task revived by a manual run resumes its schedule.
            Some(TaskStatus::Completed) if !self.armed.contains_key(&task_id) => {
                match self.store.get_task(task_id).await {
                    Ok(Some(task)) => {
                        let task = Task {
                            next_run_at: None,
                            ..task
                        };
                        if let Err(e) = self.arm_task(&task, Utc::now()).await {
                            error!(task_id, "Failed to re-arm task: {}", e);
                        }
                    }
                    Ok(None) => {}
                    Err(e) => error!(task_id, "Failed to load task: {}", e),
                }
            }
            _ => {}
        }

        if self.catch_up.remove(&task_id) && self.armed.contains_key(&task_id) {
            debug!(task_id, "Running coalesced catch-up firing");
            self.dispatch(task_id, RunOrigin::Schedule);
        }
    }

    /// Hand an attempt to the pool. Returns false if the pool is closed.
    fn dispatch(&mut self, task_id: TaskId, origin: RunOrigin) -> bool {
        self.in_flight.insert(task_id);

        let store = self.store.clone();
        let registry = Arc::clone(&self.registry);
        let logging_enabled = self.config.logging_enabled;
        let mut completion = Completion {
            task_id,
            status: None,
            in_flight: Arc::clone(&self.in_flight),
            commands: self.commands.clone(),
        };

        let job = async move {
            completion.status =
                match executor::run_attempt(&store, &registry, task_id, origin, logging_enabled)
                    .await
                {
                    Ok(outcome) => Some(outcome.status()),
                    Err(e) => {
                        error!(task_id, "Task execution could not be recorded: {}", e);
                        None
                    }
                };
        }
        .boxed();

        if self.pool.submit(job) {
            true
        } else {
            self.in_flight.remove(&task_id);
            false
        }
    }
}
