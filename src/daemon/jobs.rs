//! Command-backed job bodies
//!
//! Each configured job binds a task type to an external command. The body
//! runs the command to completion; a non-zero exit status fails the attempt.

use super::config::JobConfig;
use anyhow::{bail, Context, Result};
use kairos_core::{NewTask, TaskScheduler};
use std::collections::HashSet;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

/// Register a body for every configured job
pub fn register_jobs(scheduler: &TaskScheduler, jobs: &[JobConfig]) {
    for job in jobs {
        let job = Arc::new(job.clone());
        let task_type = job.task_type.clone();
        scheduler.register(task_type, move || {
            let job = Arc::clone(&job);
            async move { run_command(&job).await }
        });
    }
}

/// Create a task for every scheduled job that has none yet. Returns the IDs
/// of the tasks created.
pub async fn seed_jobs(scheduler: &TaskScheduler, jobs: &[JobConfig]) -> Result<Vec<i64>> {
    let existing: HashSet<String> = scheduler
        .get_all_tasks(None)
        .await?
        .into_iter()
        .map(|t| t.task_type)
        .collect();

    let mut created = Vec::new();
    for job in jobs {
        let Some(schedule) = job.schedule.as_deref() else {
            continue;
        };
        if existing.contains(&job.task_type) {
            debug!(task_type = %job.task_type, "Job already has a task");
            continue;
        }

        let mut new = NewTask::new(&job.task_type)
            .with_priority(&job.priority)
            .with_schedule(schedule)
            .with_max_retries(job.max_retries);
        if job.manual_only {
            new = new.manual_only();
        }

        let id = scheduler
            .add_task(new)
            .await
            .with_context(|| format!("Failed to seed job '{}'", job.task_type))?;
        info!(task_id = id, task_type = %job.task_type, "Seeded task from configuration");
        created.push(id);
    }
    Ok(created)
}

/// Run a job's command once
pub async fn run_command(job: &JobConfig) -> Result<()> {
    let mut command = Command::new(&job.command);
    command
        .args(&job.args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    if let Some(dir) = &job.working_dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to spawn '{}'", job.command))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        debug!(task_type = %job.task_type, "stdout: {}", stdout.trim());
    }

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "'{}' exited with {}: {}",
            job.command,
            output.status,
            stderr.trim()
        )
    }
}
