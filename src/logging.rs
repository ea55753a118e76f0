//! Tracing subscriber setup: console output plus an optional daily rolling
//! log file.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "docket-watch.log";

/// Keeps the file writer flushing. Hold it until the process exits.
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Filter directive for a configured level.
///
/// A bare level (`debug`) is scoped to this crate with HTTP internals kept
/// at `warn`; anything containing `=` or `,` is used verbatim.
pub fn default_directive(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        return level.to_owned();
    }
    let level = if level.is_empty() { "info" } else { level };
    format!("docket_watch={level},reqwest=warn,hyper=warn")
}

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// # Errors
///
/// Returns an error if the log directory cannot be created, the directive
/// is invalid, or a global subscriber is already set.
pub fn init(config: &LoggingConfig, log_dir: &Path) -> anyhow::Result<LogGuard> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(default_directive(&config.level))?,
    };

    let (file_layer, guard) = if config.file {
        std::fs::create_dir_all(log_dir)?;
        let appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()?;

    Ok(LogGuard { _file: guard })
}
