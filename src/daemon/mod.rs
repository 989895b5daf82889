//! Scheduler host
//!
//! Wires configuration, the task store and the command-backed job bodies into
//! a `TaskScheduler`.

pub mod config;
pub mod jobs;
pub mod loader;
pub mod shutdown;

use anyhow::{Context, Result};
use kairos_core::{SchedulerConfig, TaskScheduler, TaskStore};
use tracing::{info, warn};

pub use config::AppConfig;
pub use loader::load_config;

/// Open the task store and build a scheduler with every configured job
/// registered. The scheduler is not started.
pub async fn open_scheduler(config: &AppConfig, scheduler: SchedulerConfig) -> Result<TaskScheduler> {
    let db_path = config.db_path();
    let store = TaskStore::from_path(&db_path)
        .await
        .with_context(|| format!("Failed to open task database at {}", db_path.display()))?;

    let scheduler = TaskScheduler::builder()
        .store(store)
        .config(scheduler)
        .build()
        .context("Failed to build scheduler")?;

    jobs::register_jobs(&scheduler, &config.jobs);
    Ok(scheduler)
}

/// Run the scheduler in the foreground until Ctrl+C or SIGTERM
pub async fn run(config: AppConfig) -> Result<()> {
    let scheduler_config = config.scheduler.to_scheduler_config()?;
    let scheduler = open_scheduler(&config, scheduler_config).await?;

    if config.jobs.is_empty() {
        warn!("No jobs configured; only tasks with registered bodies can succeed");
    }

    scheduler.start().await.context("Failed to start scheduler")?;

    let seeded = jobs::seed_jobs(&scheduler, &config.jobs).await?;
    if !seeded.is_empty() {
        info!("Seeded {} task(s) from configuration", seeded.len());
    }

    info!(
        "Kairos scheduler running (database: {}, max concurrent: {}, check interval: {}s)",
        config.db_path().display(),
        config.scheduler.max_concurrent,
        config.scheduler.check_interval_secs
    );

    shutdown::wait_for_shutdown_signal().await;

    scheduler.shutdown().await.context("Failed to stop scheduler")?;
    Ok(())
}
