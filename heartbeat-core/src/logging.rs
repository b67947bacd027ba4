//! Diagnostics for the engine and CLI
//!
//! Everything goes to a daily file under the XDG state directory,
//! `~/.local/state/heartbeat/heartbeat.YYYY-MM-DD.log`. Handlers never print;
//! a failed store write or unreachable backend only shows up here.
//!
//! The configured level applies to heartbeat's own crates. HTTP and SQLite
//! internals stay at `warn` unless `RUST_LOG` says otherwise.

use crate::config::{Config, LoggingConfig};
use crate::error::Error;
use chrono::{NaiveDate, Utc};
use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_FILE_PREFIX: &str = "heartbeat";
const LOG_FILE_SUFFIX: &str = "log";

/// Install the file subscriber. Keep the guard alive for the whole run.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .max_log_files(config.max_files.max(1))
        .build(&log_dir)
        .map_err(|e| Error::Config(format!("failed to create log appender: {}", e)))?;
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(&config.level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true),
        )
        .try_init()
        .map_err(|e| Error::Config(format!("failed to install subscriber: {}", e)))?;

    tracing::info!(
        log_file = %log_file_path().display(),
        level = %config.level,
        "heartbeat logging started"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Test subscriber on the test writer; safe to call from every test
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Flushes buffered log lines when dropped
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Today's log file
pub fn log_file_path() -> PathBuf {
    Config::state_dir().join(log_file_name(Utc::now().date_naive()))
}

fn log_file_name(day: NaiveDate) -> String {
    format!(
        "{}.{}.{}",
        LOG_FILE_PREFIX,
        day.format("%Y-%m-%d"),
        LOG_FILE_SUFFIX
    )
}

fn filter_directives(level: &str) -> String {
    format!("warn,heartbeat={level},heartbeat_core={level}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_name_matches_daily_rotation() {
        let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(log_file_name(day), "heartbeat.2024-03-05.log");
        assert!(log_file_path().starts_with(Config::state_dir()));
    }

    #[test]
    fn test_level_applies_to_own_crates() {
        let directives = filter_directives("debug");
        assert_eq!(directives, "warn,heartbeat=debug,heartbeat_core=debug");
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn test_init_test_is_idempotent() {
        init_test();
        init_test();
        tracing::debug!("still alive");
    }
}
