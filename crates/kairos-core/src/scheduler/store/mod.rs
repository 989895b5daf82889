//! Task storage using SQLite
//!
//! The single source of truth for task state and execution history.

mod migrations;
mod queries;


use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;

use super::audit::AuditLog;
use super::types::{Result, SchedulerError, Task, TaskStatus};

pub use queries::{BeginOutcome, CancelOutcome, SettledRun};

/// SQLite-backed task store
#[derive(Clone)]
pub struct TaskStore {
    pub(super) pool: Pool<Sqlite>,
}

impl TaskStore {
    /// Open (or create) a store at the given database path
    pub async fn from_path(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SchedulerError::InvalidConfig(format!("Failed to create directory: {}", e))
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        Self::connect(&url, SqlitePoolOptions::new()).await
    }

    /// Open a private in-memory store
    pub async fn in_memory() -> Result<Self> {
        // The database lives as long as its only connection.
        let options = SqlitePoolOptions::new()
            .idle_timeout(None)
            .max_lifetime(None);
        Self::connect("sqlite::memory:", options).await
    }

    async fn connect(url: &str, options: SqlitePoolOptions) -> Result<Self> {
        // One connection: every task mutation is a read-modify-write
        // transaction and SQLite admits a single writer.
        let pool = options.max_connections(1).connect(url).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Read access to the execution history
    pub fn audit_log(&self) -> AuditLog {
        AuditLog::new(self.pool.clone())
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore").finish_non_exhaustive()
    }
}

/// Tasks the trigger engine may arm on startup
pub(crate) fn is_armable(task: &Task) -> bool {
    task.schedule.is_some()
        && !task.manual_only
        && !matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled)
}
