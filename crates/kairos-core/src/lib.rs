//! Kairos Core - Background Task Scheduling
//!
//! This crate provides the scheduling engine behind the `kairos` host:
//! - Schedules: cron and interval expressions
//! - Persistence: SQLite task table and append-only execution log
//! - Execution: bounded worker pool with retry-aware state transitions

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod scheduler;

pub use scheduler::{
    NewTask, Priority, SchedulerConfig, SchedulerError, SchedulerResult, Task, TaskId,
    TaskScheduler, TaskStatus, TaskStore,
};
