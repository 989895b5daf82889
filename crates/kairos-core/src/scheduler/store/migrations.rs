use super::TaskStore;
use crate::scheduler::types::Result;

impl TaskStore {
    /// Run database migrations
    pub(super) async fn migrate(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_type TEXT NOT NULL,
                priority TEXT NOT NULL,
                schedule TEXT,
                manual_only BOOLEAN NOT NULL DEFAULT FALSE,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                status TEXT NOT NULL,
                last_run_at TIMESTAMP,
                next_run_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                CHECK (retry_count >= 0 AND retry_count <= max_retries)
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS task_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                started_at TIMESTAMP NOT NULL,
                completed_at TIMESTAMP,
                error_message TEXT,
                FOREIGN KEY (task_id) REFERENCES tasks(id)
            )
            "#,
        )
        .execute(&mut *tx)
        .await?;

        // Execution records are write-once.
        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS task_logs_no_update
            BEFORE UPDATE ON task_logs
            BEGIN
                SELECT RAISE(ABORT, 'task_logs is append-only');
            END
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS task_logs_no_delete
            BEFORE DELETE ON task_logs
            BEGIN
                SELECT RAISE(ABORT, 'task_logs is append-only');
            END
            "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)")
            .execute(&mut *tx)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_next_run_at ON tasks(next_run_at)")
            .execute(&mut *tx)
            .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_logs_task_id ON task_logs(task_id)")
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }
}
