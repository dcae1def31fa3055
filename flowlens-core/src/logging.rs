//! Logging for the flowlens engine
//!
//! File logs land in the XDG state dir (`~/.local/state/flowlens/`), one
//! file per day. Old files are pruned so at most `max_files` days are kept;
//! captured traffic is verbose enough that unbounded logs pile up fast.

use crate::config::{Config, LoggingConfig};
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize the logging system
///
/// Level comes from `RUST_LOG` when set, otherwise from the config.
pub fn init(config: &LoggingConfig) -> Result<LoggingGuard> {
    let log_dir = Config::state_dir();
    std::fs::create_dir_all(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender(config, &log_dir)?);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    tracing::info!(
        log_dir = %log_dir.display(),
        level = %config.level,
        max_files = config.max_files,
        "Logging initialized"
    );

    Ok(LoggingGuard { _guard: guard })
}

/// Daily-rotated appender, pruned to the configured number of files.
///
/// Produces `flowlens.YYYY-MM-DD.log` under `dir`.
fn file_appender(config: &LoggingConfig, dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("flowlens")
        .filename_suffix("log")
        .max_log_files(config.max_files.max(1))
        .build(dir)
        .map_err(|e| Error::Config(format!("cannot open log file in {}: {}", dir.display(), e)))
}

/// Initialize logging for tests (logs to stdout)
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

/// Guard that keeps the logging system alive
///
/// When dropped, flushes any pending log writes.
pub struct LoggingGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Returns the directory log files are written to
pub fn log_dir() -> PathBuf {
    Config::state_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appender_uses_configured_file_cap() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "info".to_string(),
            max_files: 3,
        };
        assert!(file_appender(&config, dir.path()).is_ok());
    }

    #[test]
    fn test_zero_file_cap_is_clamped() {
        // The appender rejects a cap of zero outright; the config value is
        // clamped instead of failing init.
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "info".to_string(),
            max_files: 0,
        };
        assert!(file_appender(&config, dir.path()).is_ok());
    }
}
