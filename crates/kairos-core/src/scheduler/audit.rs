//! Audit log
//!
//! Append-only history of execution attempts, one record per attempt.
//! Records are written in the same transaction that settles the task row
//! and are never updated or deleted afterwards.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};

use super::types::{ExecutionRecord, ExecutionRow, ExecutionStatus, Result, TaskId};

/// A record about to be appended
#[derive(Debug, Clone, Copy)]
pub(crate) struct AuditEntry<'a> {
    pub task_id: TaskId,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error_message: Option<&'a str>,
}

/// Append a record using the caller's connection (normally an open
/// transaction).
pub(crate) async fn append(
    conn: &mut SqliteConnection,
    entry: AuditEntry<'_>,
) -> Result<ExecutionRecord> {
    let row: ExecutionRow = sqlx::query_as(
        r#"
        INSERT INTO task_logs (task_id, status, started_at, completed_at, error_message)
        VALUES (?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(entry.task_id)
    .bind(entry.status.as_str())
    .bind(entry.started_at)
    .bind(entry.completed_at)
    .bind(entry.error_message)
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

/// Read-only view of the execution history
#[derive(Clone)]
pub struct AuditLog {
    pool: Pool<Sqlite>,
}

impl AuditLog {
    pub(crate) fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// All attempts of a task, oldest first
    pub async fn history(&self, task_id: TaskId) -> Result<Vec<ExecutionRecord>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT * FROM task_logs WHERE task_id = ? ORDER BY started_at ASC, id ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Most recent attempts across all tasks, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<ExecutionRecord>> {
        let rows: Vec<ExecutionRow> =
            sqlx::query_as("SELECT * FROM task_logs ORDER BY id DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Number of attempts recorded for a task
    pub async fn count(&self, task_id: TaskId) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_logs WHERE task_id = ?")
            .bind(task_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
