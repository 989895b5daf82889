//! Scheduler task types and error definitions
//!
//! Contains the core types used by the scheduler system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Identifier assigned to a task by the store
pub type TaskId = i64;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Scheduler error types
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Caller supplied an invalid task definition; nothing was persisted
    #[error("validation error: {0}")]
    Validation(String),
    /// The task store could not be reached or rejected the operation
    #[error("persistence error: {0}")]
    Persistence(#[from] sqlx::Error),
    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// A persisted row could not be decoded
    #[error("corrupt task row: {0}")]
    CorruptRow(String),
    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Operation requires a started scheduler
    #[error("scheduler is not running")]
    NotRunning,
    /// `start` was called twice
    #[error("scheduler already started")]
    AlreadyStarted,
}

/// Task priority. Informational ordering hint; never preempts a running job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Background work
    Low,
    /// Default priority
    Normal,
    /// Dispatched ahead of normal work due on the same tick
    High,
    /// Dispatched first
    Critical,
}

impl Priority {
    /// All priorities, lowest first
    pub const ALL: [Priority; 4] = [Self::Low, Self::Normal, Self::High, Self::Critical];

    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| SchedulerError::Validation(format!("invalid priority: {s}")))
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its trigger or a manual run
    Pending,
    /// An attempt is in flight
    Running,
    /// Last attempt succeeded
    Completed,
    /// Retries exhausted
    Failed,
    /// Cancelled by the caller
    Cancelled,
}

impl TaskStatus {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// No automatic transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(SchedulerError::Validation(format!("invalid status: {other}"))),
        }
    }
}

/// Persisted task definition and live run summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID
    pub id: TaskId,
    /// Key into the task registry
    pub task_type: String,
    /// Ordering hint
    pub priority: Priority,
    /// Schedule expression, if any
    pub schedule: Option<String>,
    /// Whether the schedule is ignored (manual triggering only)
    pub manual_only: bool,
    /// Failed attempts counted against `max_retries`
    pub retry_count: u32,
    /// Maximum retry attempts
    pub max_retries: u32,
    /// Current status
    pub status: TaskStatus,
    /// Start of the most recent attempt
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next scheduled firing
    pub next_run_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

/// Request to create a task.
///
/// `priority` is kept as text so that it is validated by the scheduler
/// before anything is written.
#[derive(Debug, Clone)]
pub struct NewTask {
    /// Key into the task registry
    pub task_type: String,
    /// One of `low`, `normal`, `high`, `critical`
    pub priority: String,
    /// Cron expression or `interval <seconds>`
    pub schedule: Option<String>,
    /// Maximum retry attempts
    pub max_retries: u32,
    /// Persist the schedule but never arm it
    pub manual_only: bool,
}

impl NewTask {
    /// Default number of retries for a new task
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Create a normal-priority, unscheduled task request
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            priority: Priority::Normal.as_str().to_string(),
            schedule: None,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            manual_only: false,
        }
    }

    /// Set task priority
    pub fn with_priority(mut self, priority: impl Into<String>) -> Self {
        self.priority = priority.into();
        self
    }

    /// Set the schedule expression
    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = Some(schedule.into());
        self
    }

    /// Set max retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Only run when triggered manually
    pub fn manual_only(mut self) -> Self {
        self.manual_only = true;
        self
    }
}

/// Outcome stored in an execution record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Body returned success
    Completed,
    /// Body failed, panicked or was not registered
    Failed,
}

impl ExecutionStatus {
    /// Stored representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Record ID
    pub id: i64,
    /// Owning task
    pub task_id: TaskId,
    /// Attempt outcome
    pub status: ExecutionStatus,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub completed_at: Option<DateTime<Utc>>,
    /// Error raised by the body, if any
    pub error_message: Option<String>,
}

/// Internal row type for task queries
#[derive(FromRow)]
pub(super) struct TaskRow {
    pub id: i64,
    pub task_type: String,
    pub priority: String,
    pub schedule: Option<String>,
    pub manual_only: bool,
    pub retry_count: i64,
    pub max_retries: i64,
    pub status: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn count_from_row(id: TaskId, field: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| SchedulerError::CorruptRow(format!("task {id}: {field} = {value}")))
}

impl TryFrom<TaskRow> for Task {
    type Error = SchedulerError;

    fn try_from(row: TaskRow) -> Result<Self> {
        let id = row.id;
        let corrupt = |e: SchedulerError| SchedulerError::CorruptRow(format!("task {id}: {e}"));
        Ok(Task {
            id,
            priority: row.priority.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            retry_count: count_from_row(id, "retry_count", row.retry_count)?,
            max_retries: count_from_row(id, "max_retries", row.max_retries)?,
            task_type: row.task_type,
            schedule: row.schedule,
            manual_only: row.manual_only,
            last_run_at: row.last_run_at,
            next_run_at: row.next_run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Internal row type for execution log queries
#[derive(FromRow)]
pub(super) struct ExecutionRow {
    pub id: i64,
    pub task_id: i64,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl TryFrom<ExecutionRow> for ExecutionRecord {
    type Error = SchedulerError;

    fn try_from(row: ExecutionRow) -> Result<Self> {
        let status = match row.status.as_str() {
            "completed" => ExecutionStatus::Completed,
            "failed" => ExecutionStatus::Failed,
            other => {
                return Err(SchedulerError::CorruptRow(format!(
                    "execution {}: status = {other}",
                    row.id
                )))
            }
        };
        Ok(ExecutionRecord {
            id: row.id,
            task_id: row.task_id,
            status,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_message: row.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parse_and_order() {
        assert_eq!("critical".parse::<Priority>().unwrap(), Priority::Critical);
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Normal > Priority::Low);

        let err = "urgent".parse::<Priority>().unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert!("Normal".parse::<Priority>().is_err());
    }

    #[test]
    fn test_status_round_trips_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_task_serializes_with_snake_case_enums() {
        let now = Utc::now();
        let task = Task {
            id: 7,
            task_type: "nightly_extraction".to_string(),
            priority: Priority::High,
            schedule: Some("0 23 * * *".to_string()),
            manual_only: false,
            retry_count: 1,
            max_retries: 3,
            status: TaskStatus::Pending,
            last_run_at: None,
            next_run_at: Some(now),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["priority"], "high");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["retry_count"], 1);

        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_corrupt_rows_are_rejected() {
        let now = Utc::now();
        let row = TaskRow {
            id: 1,
            task_type: "x".to_string(),
            priority: "normal".to_string(),
            schedule: None,
            manual_only: false,
            retry_count: -1,
            max_retries: 3,
            status: "pending".to_string(),
            last_run_at: None,
            next_run_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(Task::try_from(row), Err(SchedulerError::CorruptRow(_))));

        let row = ExecutionRow {
            id: 2,
            task_id: 1,
            status: "exploded".to_string(),
            started_at: now,
            completed_at: Some(now),
            error_message: None,
        };
        assert!(matches!(
            ExecutionRecord::try_from(row),
            Err(SchedulerError::CorruptRow(_))
        ));
    }
}
