//! CLI module for Kairos
//!
//! Provides commands:
//! - `run`: Run the scheduler in the foreground
//! - `add`, `list`, `status`, `cancel`: Manage persisted tasks
//! - `trigger`: Run a task now and wait for the attempt to settle
//! - `history`: Show recorded execution attempts

use crate::daemon::AppConfig;
use clap::{Parser, Subcommand};
use kairos_core::TaskStatus;

pub mod tasks;

/// Kairos task scheduler CLI
#[derive(Parser, Debug)]
#[command(name = "kairos")]
#[command(about = "Background task scheduler")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduler until Ctrl+C or SIGTERM
    Run,
    /// Add a task
    Add {
        /// Task type (must match a configured job to succeed)
        task_type: String,
        /// low, normal, high or critical
        #[arg(short, long, default_value = "normal")]
        priority: String,
        /// Cron expression ("0 23 * * *") or "interval <seconds>"
        #[arg(short, long)]
        schedule: Option<String>,
        /// Retries allowed after a failed attempt
        #[arg(long, default_value_t = 3)]
        max_retries: u32,
        /// Keep the schedule but only run when triggered
        #[arg(long)]
        manual_only: bool,
    },
    /// List tasks
    List {
        /// Only show tasks with this status
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Status {
        id: i64,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a task now and wait for the attempt to settle
    Trigger {
        id: i64,
        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 300)]
        wait_secs: u64,
    },
    /// Cancel a task
    Cancel { id: i64 },
    /// Show execution history of a task, or the most recent executions
    History {
        id: Option<i64>,
        /// Number of records when no ID is given
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
        /// Print JSON
        #[arg(long)]
        json: bool,
    },
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    s.parse().map_err(|e: kairos_core::SchedulerError| e.to_string())
}

/// Run the CLI command
pub async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run) => crate::daemon::run(config).await,
        Some(Commands::Add {
            task_type,
            priority,
            schedule,
            max_retries,
            manual_only,
        }) => {
            tasks::add(
                &config,
                tasks::AddArgs {
                    task_type,
                    priority,
                    schedule,
                    max_retries,
                    manual_only,
                },
            )
            .await
        }
        Some(Commands::List { status, json }) => tasks::list(&config, status, json).await,
        Some(Commands::Status { id, json }) => tasks::status(&config, id, json).await,
        Some(Commands::Trigger { id, wait_secs }) => tasks::trigger(&config, id, wait_secs).await,
        Some(Commands::Cancel { id }) => tasks::cancel(&config, id).await,
        Some(Commands::History { id, limit, json }) => {
            tasks::history(&config, id, limit, json).await
        }
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
