//! Configuration module for tempbox.

use serde::Deserialize;
use std::path::Path;

use crate::{Result, TempboxError};

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the active (read-write) SQLite database file.
    #[serde(default = "default_active_path")]
    pub active_path: String,
    /// Path to the historical (read-only) SQLite database file.
    ///
    /// When unset or when the file does not exist, only the active store is used.
    #[serde(default)]
    pub historical_path: Option<String>,
    /// Maximum number of pooled connections per store.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_active_path() -> String {
    "data/tempbox.db".to_string()
}

fn default_max_connections() -> u32 {
    8
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            active_path: default_active_path(),
            historical_path: None,
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Retry configuration for transient store errors.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff delay in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    20
}

fn default_max_delay() -> u64 {
    500
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Retention configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Messages older than this many days are removed unless starred.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    /// Sweep interval in seconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Lifetime of a newly generated address in hours.
    #[serde(default = "default_address_ttl")]
    pub address_ttl_hours: i64,
}

fn default_retention_days() -> i64 {
    7
}

fn default_sweep_interval() -> u64 {
    3600 // 1 hour
}

fn default_address_ttl() -> i64 {
    24 * 30
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval(),
            address_ttl_hours: default_address_ttl(),
        }
    }
}

/// Mailbox configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxConfig {
    /// Domains addresses may be generated under and mail may be received for.
    #[serde(default = "default_domains")]
    pub domains: Vec<String>,
    /// Length of the random local part of generated addresses.
    #[serde(default = "default_local_part_length")]
    pub local_part_length: usize,
}

fn default_domains() -> Vec<String> {
    vec!["tempbox.local".to_string()]
}

fn default_local_part_length() -> usize {
    10
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            domains: default_domains(),
            local_part_length: default_local_part_length(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Without one, logs go to stderr only.
    #[serde(default = "default_log_file")]
    pub file: Option<String>,
    /// Append to an existing log file instead of truncating it.
    #[serde(default = "default_log_append")]
    pub append: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file() -> Option<String> {
    Some("logs/tempbox.log".to_string())
}

fn default_log_append() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: default_log_file(),
            append: default_log_append(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Retention configuration.
    #[serde(default)]
    pub retention: RetentionConfig,
    /// Mailbox configuration.
    #[serde(default)]
    pub mailbox: MailboxConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(TempboxError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| TempboxError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `TEMPBOX_ACTIVE_DB`: Override the active database path
    /// - `TEMPBOX_HISTORICAL_DB`: Override the historical database path
    /// - `TEMPBOX_LOG_FILE`: Override the log file path (empty disables it)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TEMPBOX_ACTIVE_DB") {
            if !path.is_empty() {
                self.database.active_path = path;
            }
        }
        if let Ok(path) = std::env::var("TEMPBOX_HISTORICAL_DB") {
            if !path.is_empty() {
                self.database.historical_path = Some(path);
            }
        }
        if let Ok(path) = std::env::var("TEMPBOX_LOG_FILE") {
            self.logging.file = (!path.is_empty()).then_some(path);
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(TempboxError::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retention.retention_days < 0 {
            return Err(TempboxError::Config(
                "retention.retention_days must not be negative".to_string(),
            ));
        }
        if self.retention.sweep_interval_secs == 0 {
            return Err(TempboxError::Config(
                "retention.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.mailbox.domains.is_empty() {
            return Err(TempboxError::Config(
                "mailbox.domains must list at least one domain".to_string(),
            ));
        }
        if self.mailbox.local_part_length == 0 {
            return Err(TempboxError::Config(
                "mailbox.local_part_length must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
