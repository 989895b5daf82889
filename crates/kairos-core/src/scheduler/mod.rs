//! Background task scheduler
//!
//! Applications register job bodies by task type, persist task definitions
//! with a priority and an optional schedule, and let the scheduler fire them:
//!
//! - **Cron schedules**: five fields, evaluated in a configurable timezone
//! - **Interval schedules**: `interval <seconds>`
//! - **Manual runs**: `trigger_task`, outside any schedule
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  TaskScheduler  │  Validation, registry, public API
//! └────────┬────────┘
//!          │ commands
//!          ▼
//! ┌─────────────────┐
//! │  TriggerEngine  │  Min-heap of next fire times, dispatch decisions
//! └────────┬────────┘
//!          │ jobs
//!          ▼
//! ┌─────────────────┐
//! │  ExecutorPool   │  Bounded workers running job bodies
//! └────────┬────────┘
//!          │ outcome
//!          ▼
//! ┌─────────────────┐
//! │   TaskStore     │  SQLite: tasks + append-only task_logs
//! └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use kairos_core::scheduler::{NewTask, SchedulerConfig, TaskScheduler, TaskStore};
//!
//! let store = TaskStore::from_path(&db_path).await?;
//! let scheduler = TaskScheduler::builder()
//!     .store(store)
//!     .config(SchedulerConfig::new().with_max_concurrent(4))
//!     .build()?;
//!
//! scheduler.register("nightly_extraction", || async {
//!     extract_everything().await
//! });
//!
//! scheduler.start().await?;
//! let id = scheduler
//!     .add_task(
//!         NewTask::new("nightly_extraction")
//!             .with_priority("critical")
//!             .with_schedule("0 23 * * *"),
//!     )
//!     .await?;
//! ```

mod audit;
mod engine;
mod executor;
mod registry;
mod retry;
mod schedule;
mod service;
mod store;
mod types;

pub use audit::AuditLog;
pub use engine::SchedulerConfig;
pub use executor::ExecutionError;
pub use registry::{TaskBody, TaskRegistry};
pub use retry::{RunOrigin, Settlement, Transition};
pub use schedule::{CronTrigger, IntervalTrigger, ScheduleParseError, Trigger};
pub use service::{TaskScheduler, TaskSchedulerBuilder};
pub use store::{BeginOutcome, CancelOutcome, SettledRun, TaskStore};
pub use types::{
    ExecutionRecord, ExecutionStatus, NewTask, Priority, Result as SchedulerResult,
    SchedulerError, Task, TaskId, TaskStatus,
};

/// State-machine transition functions
pub mod transitions {
    pub use super::retry::{cancel, can_begin, recover, runnable_from, settle};
}
