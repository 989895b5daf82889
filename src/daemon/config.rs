//! Configuration types
//!
//! Contains all configuration structures for the Kairos host.

use anyhow::{Context, Result};
use chrono_tz::Tz;
use kairos_core::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the database. Defaults to `~/.kairos`.
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Database file name inside `data_dir`
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default)]
    pub scheduler: SchedulerAppConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Command-backed job definitions
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

fn default_database() -> String {
    "kairos.db".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: default_database(),
            scheduler: SchedulerAppConfig::default(),
            logging: LoggingConfig::default(),
            jobs: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Resolved data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir)
    }

    /// Full path of the task database
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join(&self.database)
    }
}

/// `~/.kairos`, or `.kairos` when there is no home directory
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".kairos"))
        .unwrap_or_else(|| PathBuf::from(".kairos"))
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerAppConfig {
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub retry_delay_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub logging_enabled: bool,
    /// IANA timezone name for cron schedules
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerAppConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            retry_delay_secs: 0,
            max_concurrent: default_max_concurrent(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            logging_enabled: true,
            timezone: default_timezone(),
        }
    }
}

impl SchedulerAppConfig {
    /// Convert into the core scheduler configuration
    pub fn to_scheduler_config(&self) -> Result<SchedulerConfig> {
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("Invalid scheduler timezone: {}", self.timezone))?;

        Ok(SchedulerConfig::default()
            .with_check_interval(self.check_interval_secs)
            .with_retry_delay(self.retry_delay_secs)
            .with_max_concurrent(self.max_concurrent)
            .with_shutdown_timeout(self.shutdown_timeout_secs)
            .with_logging(self.logging_enabled)
            .with_timezone(timezone))
    }
}

fn default_check_interval() -> u64 {
    60
}

fn default_max_concurrent() -> usize {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write daily-rotated log files into this directory
    #[serde(default)]
    pub dir: Option<String>,
    /// Log file name prefix
    #[serde(default = "default_log_prefix")]
    pub file_prefix: String,
}

fn default_log_prefix() -> String {
    "kairos.log".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            file_prefix: default_log_prefix(),
        }
    }
}

/// A task type backed by an external command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub task_type: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    /// Schedule for the task seeded by `kairos run`
    #[serde(default)]
    pub schedule: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub manual_only: bool,
}

fn default_priority() -> String {
    "normal".to_string()
}

fn default_max_retries() -> u32 {
    3
}
