//! Process-wide tracing setup.

use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use dbflow_shared::errors::{DbflowError, DbflowResult};

use crate::runtime::FilesystemLayout;

/// Keeps the non-blocking writer flushing for the life of the process.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install a subscriber writing to a daily-rolling file under the logs dir.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Only the first call
/// installs anything; if the embedding application already set a global
/// subscriber, that one is kept.
pub fn init_logging_for(layout: &FilesystemLayout) -> DbflowResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("dbflow")
        .filename_suffix("log")
        .build(layout.logs_dir())
        .map_err(|e| {
            DbflowError::Storage(format!(
                "failed to create log file in {}: {}",
                layout.logs_dir().display(),
                e
            ))
        })?;
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init();

    if installed.is_ok() {
        let _ = LOG_GUARD.set(guard);
        tracing::debug!(logs_dir = %layout.logs_dir().display(), "Logging initialized");
    }
    Ok(())
}
