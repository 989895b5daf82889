//! Retry controller
//!
//! The task state machine. Every change to a task's `status` or
//! `retry_count` is decided here; the store applies the decision inside the
//! transaction that read the row.
//!
//! ```text
//! pending ──► running ──► completed
//!    ▲           │
//!    └───────────┤ failure, retries left (retry_count += 1)
//!                └──► failed            (retries exhausted)
//!
//! pending | running | completed ──► cancelled   (explicit only)
//! ```

use serde::{Deserialize, Serialize};

use super::types::TaskStatus;

/// What caused a run to be dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOrigin {
    /// A trigger came due
    Schedule,
    /// `trigger_task`
    Manual,
}

/// Statuses a run may start from.
///
/// A scheduled firing re-arms a recurring task whose last attempt completed;
/// a manual trigger may re-run a task whose retries are exhausted but never
/// one that completed.
pub fn runnable_from(origin: RunOrigin) -> &'static [TaskStatus] {
    match origin {
        RunOrigin::Schedule => &[TaskStatus::Pending, TaskStatus::Completed],
        RunOrigin::Manual => &[TaskStatus::Pending, TaskStatus::Failed],
    }
}

/// Whether a run may start from `status`
pub fn can_begin(status: TaskStatus, origin: RunOrigin) -> bool {
    runnable_from(origin).contains(&status)
}

/// How a settled attempt moved the task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Attempt succeeded
    Succeeded,
    /// Attempt failed and another is allowed
    Retrying,
    /// Attempt failed with no retries left
    Exhausted,
    /// Task was cancelled while the attempt ran; status is left alone
    KeptCancelled,
}

/// New `status` / `retry_count` after an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    /// Status to persist
    pub status: TaskStatus,
    /// Retry count to persist
    pub retry_count: u32,
    /// Which branch was taken
    pub transition: Transition,
}

/// Apply an attempt outcome to the task's current state
pub fn settle(
    status: TaskStatus,
    retry_count: u32,
    max_retries: u32,
    succeeded: bool,
) -> Settlement {
    if status == TaskStatus::Cancelled {
        return Settlement {
            status,
            retry_count,
            transition: Transition::KeptCancelled,
        };
    }

    if succeeded {
        Settlement {
            status: TaskStatus::Completed,
            retry_count,
            transition: Transition::Succeeded,
        }
    } else if retry_count < max_retries {
        Settlement {
            status: TaskStatus::Pending,
            retry_count: retry_count + 1,
            transition: Transition::Retrying,
        }
    } else {
        Settlement {
            status: TaskStatus::Failed,
            retry_count,
            transition: Transition::Exhausted,
        }
    }
}

/// Status after an explicit cancellation, or `None` if the task cannot be
/// cancelled from `status`
pub fn cancel(status: TaskStatus) -> Option<TaskStatus> {
    match status {
        TaskStatus::Pending | TaskStatus::Running | TaskStatus::Completed => {
            Some(TaskStatus::Cancelled)
        }
        TaskStatus::Failed | TaskStatus::Cancelled => None,
    }
}

/// Status for a row left `running` by a process that stopped mid-attempt
pub fn recover(status: TaskStatus) -> Option<TaskStatus> {
    (status == TaskStatus::Running).then_some(TaskStatus::Pending)
}
