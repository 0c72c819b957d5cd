//! Logging setup for latexgate.
//!
//! Logs go to the console and to daily rotating files in the log directory:
//!
//! - `latexgate.<date>.log`: everything at the active level
//! - `error.<date>.log`: warnings and errors only
//!
//! Ten files of each kind are kept. `RUST_LOG` overrides the default `info`
//! level.
//!
//! ```no_run
//! use latexgate::logging;
//!
//! logging::init(&logging::default_log_dir()).expect("Failed to initialize logging");
//! tracing::info!("Gate started");
//! ```
//!
//! Identifiers appear in log fields because the usage ledger already holds
//! them; webhook tokens never do.

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer as _, fmt, layer::SubscriberExt as _, util::SubscriberInitExt as _,
};

const LOG_FILE_PREFIX: &str = "latexgate";
const ERROR_FILE_PREFIX: &str = "error";
const MAX_LOG_FILES: usize = 10;

/// Platform log directory
///
/// - Windows: `%APPDATA%/latexgate/logs`
/// - macOS: `~/Library/Application Support/latexgate/logs`
/// - Linux: `~/.local/share/latexgate/logs`
pub fn default_log_dir() -> PathBuf {
    crate::config::standard_paths().logs_dir
}

fn rolling_appender(log_dir: &Path, prefix: &str) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .max_log_files(MAX_LOG_FILES)
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(log_dir)
        .with_context(|| format!("Failed to create {prefix} file appender"))
}

/// Install the global subscriber, writing files under `log_dir`.
///
/// # Errors
///
/// Returns error if the log directory cannot be created or an appender
/// cannot be opened.
pub fn init(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let all_logs_appender = rolling_appender(log_dir, LOG_FILE_PREFIX)?;
    let error_logs_appender = rolling_appender(log_dir, ERROR_FILE_PREFIX)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .context("Failed to create env filter")?;

    // stderr keeps stdout clean for command output
    let console_layer = fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_writer(std::io::stderr)
        .pretty();

    let all_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(all_logs_appender);

    let error_logs_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
        .with_writer(error_logs_appender)
        .with_filter(EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(all_logs_layer)
        .with(error_logs_layer)
        .try_init()
        .context("Logging already initialized")?;

    tracing::debug!(log_dir = %log_dir.display(), "Logging initialized");
    Ok(())
}

/// Path of today's main log file in `log_dir`.
pub fn current_log_path(log_dir: &Path) -> PathBuf {
    dated_log_path(log_dir, LOG_FILE_PREFIX)
}

/// Path of today's warning/error log file in `log_dir`.
pub fn current_error_log_path(log_dir: &Path) -> PathBuf {
    dated_log_path(log_dir, ERROR_FILE_PREFIX)
}

fn dated_log_path(log_dir: &Path, prefix: &str) -> PathBuf {
    // tracing-appender names daily files by UTC date
    let today = chrono::Utc::now().format("%Y-%m-%d");
    log_dir.join(format!("{prefix}.{today}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_dir() {
        let log_dir = default_log_dir();
        assert!(log_dir.ends_with("latexgate/logs") || log_dir.ends_with("latexgate\\logs"));
    }

    #[test]
    fn test_current_log_paths() {
        let dir = Path::new("/var/log/latexgate");
        let main = current_log_path(dir);
        let errors = current_error_log_path(dir);

        let main_name = main.file_name().unwrap().to_string_lossy().into_owned();
        assert!(main_name.starts_with("latexgate.") && main_name.ends_with(".log"));
        assert!(errors.file_name().unwrap().to_string_lossy().starts_with("error."));
        assert_eq!(main.parent(), Some(dir));
    }
}
