//! Kairos - Background Task Scheduler
//!
//! CLI entry point for the Kairos scheduler host.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = cli::Cli::parse();
    let config = daemon::load_config()?;

    // Held until exit so buffered file output is flushed
    let _guard = init_tracing(&config.logging);

    cli::run(cli, config).await
}

fn init_tracing(logging: &daemon::config::LoggingConfig) -> Option<WorkerGuard> {
    let (file_layer, guard) = match logging.dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, &logging.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kairos=info,kairos_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    guard
}
