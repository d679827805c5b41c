//! Logging setup
//!
//! The server always logs to a daily-rotated file under the XDG state dir
//! (`~/.local/state/agent-monitor/agent-monitor.log.YYYY-MM-DD`). With
//! `console` set, a compact copy also goes to stderr.
//!
//! `RUST_LOG` wins over `[logging] level`.

use crate::config::{Config, LoggingConfig};
use crate::error::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Prefix of the rotated log files
const LOG_FILE_PREFIX: &str = "agent-monitor.log";

/// Level used when the configured one does not parse
const FALLBACK_LEVEL: &str = "info";

/// Keeps the background log writer alive; pending lines are flushed on drop.
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Install the global subscriber.
///
/// Hold the returned guard for the life of the process.
pub fn init(config: &LoggingConfig, console: bool) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    // Request handlers must never wait on log I/O
    let (writer, file_guard) = tracing_appender::non_blocking(appender);

    let (filter, rejected) = build_filter(&config.level);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_thread_ids(true)
        .with_line_number(true);

    let console_layer = console.then(|| {
        fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    if let Some(level) = rejected {
        tracing::warn!(level = %level, fallback = FALLBACK_LEVEL, "Unrecognized log level in config");
    }
    tracing::info!(log_dir = %log_dir.display(), console, "Logging initialized");

    Ok(LoggingGuard { _file: file_guard })
}

/// Filter from `RUST_LOG`, else `level`, else [`FALLBACK_LEVEL`].
///
/// Also returns the configured level when it had to be replaced.
fn build_filter(level: &str) -> (EnvFilter, Option<String>) {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return (filter, None);
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(FALLBACK_LEVEL), Some(level.to_string())),
    }
}

/// Route logs to the test harness; safe to call from every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Base path of the log file (the appender adds a date suffix)
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}
