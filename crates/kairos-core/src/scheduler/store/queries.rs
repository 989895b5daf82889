use super::TaskStore;
use crate::scheduler::audit::{self, AuditEntry};
use crate::scheduler::retry::{self, RunOrigin, Transition};
use crate::scheduler::types::{
    ExecutionRecord, ExecutionStatus, Priority, Result, SchedulerError, Task, TaskId, TaskRow,
    TaskStatus,
};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

/// Result of trying to start a run
#[derive(Debug, Clone, PartialEq)]
pub enum BeginOutcome {
    /// Row is now `running`
    Started(Task),
    /// Row was in a status the run may not start from
    NotRunnable(TaskStatus),
}

/// Result of a cancellation request
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// Row is now `cancelled`
    Cancelled(Task),
    /// Row was in a status that cannot be cancelled
    NotCancellable(TaskStatus),
    /// No such task
    NotFound,
}

/// A settled attempt: the updated row and the record appended for it
#[derive(Debug, Clone, PartialEq)]
pub struct SettledRun {
    /// Task after the transition
    pub task: Task,
    /// Appended execution record
    pub record: ExecutionRecord,
    /// Branch taken by the retry controller
    pub transition: Transition,
}

async fn fetch_task(conn: &mut SqliteConnection, id: TaskId) -> Result<Option<Task>> {
    let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    row.map(Task::try_from).transpose()
}

async fn write_status(
    conn: &mut SqliteConnection,
    id: TaskId,
    status: TaskStatus,
    retry_count: u32,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE tasks SET status = ?, retry_count = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(i64::from(retry_count))
        .bind(updated_at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

impl TaskStore {
    /// Insert a new `pending` task
    pub async fn insert_task(
        &self,
        task_type: &str,
        priority: Priority,
        schedule: Option<&str>,
        max_retries: u32,
        manual_only: bool,
    ) -> Result<Task> {
        let now = Utc::now();
        let row: TaskRow = sqlx::query_as(
            r#"
            INSERT INTO tasks (
                task_type, priority, schedule, manual_only, retry_count, max_retries,
                status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, 0, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(task_type)
        .bind(priority.as_str())
        .bind(schedule)
        .bind(manual_only)
        .bind(i64::from(max_retries))
        .bind(TaskStatus::Pending.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Result<Option<Task>> {
        let mut conn = self.pool.acquire().await?;
        fetch_task(&mut conn, id).await
    }

    /// List tasks ordered by ID, optionally filtered by status
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = match status {
            Some(status) => {
                sqlx::query_as("SELECT * FROM tasks WHERE status = ? ORDER BY id ASC")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM tasks ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Tasks with a schedule that may still fire automatically
    pub async fn list_schedulable(&self) -> Result<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"
            SELECT * FROM tasks
            WHERE schedule IS NOT NULL
              AND manual_only = FALSE
              AND status NOT IN ('failed', 'cancelled')
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.try_into()).collect()
    }

    /// Record the next scheduled firing
    pub async fn set_next_run_at(&self, id: TaskId, next: Option<DateTime<Utc>>) -> Result<()> {
        let result = sqlx::query("UPDATE tasks SET next_run_at = ? WHERE id = ?")
            .bind(next)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::TaskNotFound(id));
        }
        Ok(())
    }

    /// Mark a task `running` if the retry controller allows a run from its
    /// current status.
    pub async fn begin_run(
        &self,
        id: TaskId,
        origin: RunOrigin,
        now: DateTime<Utc>,
    ) -> Result<BeginOutcome> {
        let mut tx = self.pool.begin().await?;

        let mut task = fetch_task(&mut tx, id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))?;

        if !retry::can_begin(task.status, origin) {
            tx.rollback().await?;
            return Ok(BeginOutcome::NotRunnable(task.status));
        }

        let now = now.max(task.updated_at);
        sqlx::query("UPDATE tasks SET status = ?, last_run_at = ?, updated_at = ? WHERE id = ?")
            .bind(TaskStatus::Running.as_str())
            .bind(now)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        task.status = TaskStatus::Running;
        task.last_run_at = Some(now);
        task.updated_at = now;
        Ok(BeginOutcome::Started(task))
    }

    /// Settle a finished attempt: apply the retry controller's transition and
    /// append the execution record in one transaction.
    pub async fn finish_run(
        &self,
        id: TaskId,
        started_at: DateTime<Utc>,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SettledRun> {
        let mut tx = self.pool.begin().await?;

        let mut task = fetch_task(&mut tx, id)
            .await?
            .ok_or(SchedulerError::TaskNotFound(id))?;

        let settlement = retry::settle(task.status, task.retry_count, task.max_retries, error.is_none());
        let now = now.max(task.updated_at);
        write_status(&mut tx, id, settlement.status, settlement.retry_count, now).await?;

        let record = audit::append(
            &mut tx,
            AuditEntry {
                task_id: id,
                status: if error.is_none() {
                    ExecutionStatus::Completed
                } else {
                    ExecutionStatus::Failed
                },
                started_at,
                completed_at: now,
                error_message: error,
            },
        )
        .await?;

        tx.commit().await?;

        task.status = settlement.status;
        task.retry_count = settlement.retry_count;
        task.updated_at = now;
        Ok(SettledRun {
            task,
            record,
            transition: settlement.transition,
        })
    }

    /// Cancel a task if the retry controller allows it
    pub async fn cancel_task(&self, id: TaskId, now: DateTime<Utc>) -> Result<CancelOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(mut task) = fetch_task(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(CancelOutcome::NotFound);
        };

        let Some(status) = retry::cancel(task.status) else {
            tx.rollback().await?;
            return Ok(CancelOutcome::NotCancellable(task.status));
        };

        let now = now.max(task.updated_at);
        sqlx::query("UPDATE tasks SET status = ?, next_run_at = NULL, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        task.status = status;
        task.next_run_at = None;
        task.updated_at = now;
        Ok(CancelOutcome::Cancelled(task))
    }

    /// Return rows stuck in `running` (left by a stopped process) to
    /// `pending`. Returns the IDs that were recovered.
    pub async fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<Vec<TaskId>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE status = ?")
            .bind(TaskStatus::Running.as_str())
            .fetch_all(&mut *tx)
            .await?;

        let mut recovered = Vec::new();
        for row in rows {
            let task = Task::try_from(row)?;
            if let Some(status) = retry::recover(task.status) {
                write_status(&mut tx, task.id, status, task.retry_count, now.max(task.updated_at))
                    .await?;
                recovered.push(task.id);
            }
        }

        tx.commit().await?;
        Ok(recovered)
    }
}
