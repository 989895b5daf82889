//! Configuration loading
//!
//! Handles loading configuration from embedded defaults, files, and environment.

use super::config::AppConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};

/// Embedded default configuration (compiled into binary)
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Load configuration from files and environment
pub fn load_config() -> Result<AppConfig> {
    let env = std::env::var("KAIROS_ENV").unwrap_or_else(|_| "development".to_string());

    let config = Config::builder()
        // 1. Embedded defaults (always available)
        .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
        // 2. External overrides (optional)
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{env}")).required(false))
        .add_source(File::with_name("config/local").required(false))
        // 3. Environment variables (highest priority), KAIROS_SCHEDULER__MAX_CONCURRENT
        .add_source(
            Environment::with_prefix("KAIROS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to build configuration")?;

    config
        .try_deserialize()
        .context("Failed to deserialize configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml))
            .add_source(File::from_str(extra, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_embedded_defaults() {
        let config = parse("");
        assert_eq!(config.database, "kairos.db");
        assert_eq!(config.scheduler.max_concurrent, 10);
        assert_eq!(config.scheduler.check_interval_secs, 60);
        assert_eq!(config.scheduler.timezone, "UTC");
        assert!(config.logging.dir.is_none());
        assert!(config.jobs.is_empty());

        let core = config.scheduler.to_scheduler_config().unwrap();
        assert_eq!(core.max_concurrent, 10);
        assert_eq!(core.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_jobs_and_overrides() {
        let config = parse(
            r#"
            data_dir = "/tmp/kairos-test"

            [scheduler]
            max_concurrent = 2
            timezone = "Asia/Seoul"

            [[jobs]]
            task_type = "nightly_extraction"
            command = "python"
            args = ["extract.py"]
            schedule = "0 23 * * *"
            priority = "critical"

            [[jobs]]
            task_type = "cleanup"
            command = "true"
            "#,
        );

        assert_eq!(
            config.db_path(),
            std::path::PathBuf::from("/tmp/kairos-test/kairos.db")
        );
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(config.jobs[0].priority, "critical");
        assert_eq!(config.jobs[0].args, vec!["extract.py".to_string()]);
        assert_eq!(config.jobs[1].priority, "normal");
        assert_eq!(config.jobs[1].max_retries, 3);
        assert!(config.jobs[1].schedule.is_none());

        let core = config.scheduler.to_scheduler_config().unwrap();
        assert_eq!(core.max_concurrent, 2);
        assert_eq!(core.timezone, chrono_tz::Asia::Seoul);
    }

    #[test]
    fn test_invalid_timezone_is_rejected() {
        let config = parse("[scheduler]\ntimezone = \"Mars/Olympus\"\n");
        assert!(config.scheduler.to_scheduler_config().is_err());
    }
}
