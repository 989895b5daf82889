//! Task management CLI commands
//!
//! `kairos add`      : persist a task and compute its first firing
//! `kairos list`     : list tasks, optionally by status
//! `kairos status`   : show one task
//! `kairos trigger`  : run a task now and wait for the outcome
//! `kairos cancel`   : cancel a task
//! `kairos history`  : show execution records

use crate::daemon::{self, AppConfig};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use kairos_core::scheduler::ExecutionRecord;
use kairos_core::{NewTask, Task, TaskScheduler, TaskStatus};
use std::time::Duration;

/// Arguments of `kairos add`
pub struct AddArgs {
    pub task_type: String,
    pub priority: String,
    pub schedule: Option<String>,
    pub max_retries: u32,
    pub manual_only: bool,
}

// ── Helpers ──────────────────────────────────────────────────────────

async fn open(config: &AppConfig) -> Result<TaskScheduler> {
    let scheduler_config = config.scheduler.to_scheduler_config()?;
    daemon::open_scheduler(config, scheduler_config).await
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    match time {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "⏳",
        TaskStatus::Running => "🔄",
        TaskStatus::Completed => "✅",
        TaskStatus::Failed => "❌",
        TaskStatus::Cancelled => "🚫",
    }
}

fn print_task(task: &Task) {
    println!("\n{} Task #{} ({})", status_icon(task.status), task.id, task.task_type);
    println!("─────────────────────────");
    println!("Status:       {}", task.status);
    println!("Priority:     {}", task.priority);
    println!(
        "Schedule:     {}{}",
        task.schedule.as_deref().unwrap_or("-"),
        if task.manual_only { " (manual only)" } else { "" }
    );
    println!("Retries:      {}/{}", task.retry_count, task.max_retries);
    println!("Last run:     {}", format_time(task.last_run_at));
    println!("Next run:     {}", format_time(task.next_run_at));
    println!("Created:      {}", format_time(Some(task.created_at)));
}

fn print_record(record: &ExecutionRecord) {
    let icon = match record.status {
        kairos_core::scheduler::ExecutionStatus::Completed => "✅",
        kairos_core::scheduler::ExecutionStatus::Failed => "❌",
    };
    println!(
        "{icon} #{:<6} task {:<6} {}  {}",
        record.id,
        record.task_id,
        format_time(Some(record.started_at)),
        record.error_message.as_deref().unwrap_or(""),
    );
}

// ── Add ──────────────────────────────────────────────────────────────

pub async fn add(config: &AppConfig, args: AddArgs) -> Result<()> {
    let scheduler = open(config).await?;

    let mut new = NewTask::new(args.task_type)
        .with_priority(args.priority)
        .with_max_retries(args.max_retries);
    if let Some(schedule) = args.schedule {
        new = new.with_schedule(schedule);
    }
    if args.manual_only {
        new = new.manual_only();
    }

    let id = scheduler.add_task(new).await.context("Failed to add task")?;
    let task = scheduler
        .get_task_status(id)
        .await?
        .context("Task disappeared after insert")?;

    println!("✅ Added task #{id}");
    if task.schedule.is_some() && task.next_run_at.is_none() && !task.manual_only {
        println!("⚠️  Schedule could not be armed; the task only runs when triggered.");
    }
    if !scheduler.registry().contains(&task.task_type) {
        println!(
            "⚠️  No job is configured for '{}'; its attempts will fail.",
            task.task_type
        );
    }
    Ok(())
}

// ── List / Status ────────────────────────────────────────────────────

pub async fn list(config: &AppConfig, status: Option<TaskStatus>, json: bool) -> Result<()> {
    let scheduler = open(config).await?;
    let tasks = scheduler.get_all_tasks(status).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }

    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "\n{:<6} {:<24} {:<10} {:<10} {:<8} {}",
        "ID", "TYPE", "PRIORITY", "STATUS", "RETRIES", "NEXT RUN"
    );
    for task in &tasks {
        println!(
            "{:<6} {:<24} {:<10} {:<10} {:<8} {}",
            task.id,
            task.task_type,
            task.priority,
            task.status,
            format!("{}/{}", task.retry_count, task.max_retries),
            format_time(task.next_run_at),
        );
    }
    Ok(())
}

pub async fn status(config: &AppConfig, id: i64, json: bool) -> Result<()> {
    let scheduler = open(config).await?;
    let Some(task) = scheduler.get_task_status(id).await? else {
        bail!("Task #{id} not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_task(&task);
    }
    Ok(())
}

// ── Trigger ──────────────────────────────────────────────────────────

pub async fn trigger(config: &AppConfig, id: i64, wait_secs: u64) -> Result<()> {
    // Only the requested task runs; other overdue schedules wait for the daemon
    let scheduler_config = config
        .scheduler
        .to_scheduler_config()?
        .with_restore_on_start(false);
    let scheduler = daemon::open_scheduler(config, scheduler_config).await?;
    scheduler.start().await?;

    let result = trigger_and_wait(&scheduler, id, Duration::from_secs(wait_secs)).await;
    scheduler.shutdown().await?;
    result
}

async fn trigger_and_wait(scheduler: &TaskScheduler, id: i64, wait: Duration) -> Result<()> {
    let before = scheduler.audit_log().count(id).await?;

    if !scheduler.trigger_task(id).await? {
        match scheduler.get_task_status(id).await? {
            Some(task) => bail!("Task #{id} cannot be triggered (status: {})", task.status),
            None => bail!("Task #{id} not found"),
        }
    }
    println!("🚀 Triggered task #{id}");

    let finished = tokio::time::timeout(wait, async {
        while scheduler.is_running(id) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if finished.is_err() {
        bail!("Task #{id} still running after {}s", wait.as_secs());
    }

    let history = scheduler.task_history(id).await?;
    if history.len() as i64 > before {
        if let Some(record) = history.last() {
            print_record(record);
        }
    }
    if let Some(task) = scheduler.get_task_status(id).await? {
        println!("{} Task #{} is now {}", status_icon(task.status), id, task.status);
    }
    Ok(())
}

// ── Cancel ───────────────────────────────────────────────────────────

pub async fn cancel(config: &AppConfig, id: i64) -> Result<()> {
    let scheduler = open(config).await?;
    if scheduler.cancel_task(id).await? {
        println!("🚫 Cancelled task #{id}");
        return Ok(());
    }

    match scheduler.get_task_status(id).await? {
        Some(task) => bail!("Task #{id} cannot be cancelled (status: {})", task.status),
        None => bail!("Task #{id} not found"),
    }
}

// ── History ──────────────────────────────────────────────────────────

pub async fn history(config: &AppConfig, id: Option<i64>, limit: i64, json: bool) -> Result<()> {
    let scheduler = open(config).await?;
    let records = match id {
        Some(id) => scheduler.task_history(id).await?,
        None => scheduler.recent_executions(limit).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No executions recorded.");
        return Ok(());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}
