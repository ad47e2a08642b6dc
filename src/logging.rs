//! Logging setup for tempbox.
//!
//! Events go to stderr so `tempbox sweep` can print its report on stdout,
//! and to a log file when one is configured. `TEMPBOX_LOG` takes
//! `EnvFilter` directives and wins over the configured level.

use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;
use crate::{Result, TempboxError};

/// Environment variable holding filter directives.
pub const LOG_ENV: &str = "TEMPBOX_LOG";

/// Parse log level string to tracing Level.
fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Directives used when `TEMPBOX_LOG` is unset. sqlx logs every statement,
/// so it is held at warn.
fn default_directives(level: &str) -> String {
    format!("{},sqlx=warn", parse_level(level).to_string().to_lowercase())
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directives(level)))
}

/// Open the log file, creating its directory when missing.
fn open_log_file(path: &Path, append: bool) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.create(true);
    if append {
        options.append(true);
    } else {
        options.write(true).truncate(true);
    }
    Ok(options.open(path)?)
}

/// Initialize logging from the configuration.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let file_layer = match config.file.as_deref() {
        Some(path) => {
            let file = Arc::new(open_log_file(Path::new(path), config.append)?);
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(file_layer)
        .try_init()
        .map_err(|e| TempboxError::Config(format!("logging already initialized: {e}")))
}

/// Initialize stderr-only logging. Used when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("ERROR"), Level::ERROR);
        assert_eq!(parse_level("invalid"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_default_directives_quiet_sqlx() {
        assert_eq!(default_directives("debug"), "debug,sqlx=warn");
        assert_eq!(default_directives("bogus"), "info,sqlx=warn");
    }

    #[test]
    fn test_log_file_append_and_truncate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("tempbox.log");

        writeln!(open_log_file(&path, true).unwrap(), "first").unwrap();
        writeln!(open_log_file(&path, true).unwrap(), "second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");

        drop(open_log_file(&path, false).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }
}
