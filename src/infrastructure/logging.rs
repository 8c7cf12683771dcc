use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Keeps the background log writer alive; logs are flushed when dropped.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Routes `tracing` output to a daily-rolling `focusboard.log` in `logs_dir`.
/// Returns `None` when a global subscriber is already installed.
pub fn init_logging(logs_dir: &Path) -> Option<LoggingGuard> {
    let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, "focusboard.log");
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .try_init()
        .is_ok();

    if !installed {
        return None;
    }
    tracing::info!(logs_dir = %logs_dir.display(), "logging initialized");
    Some(LoggingGuard { _guard: guard })
}
