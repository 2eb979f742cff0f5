//! Structured Logger
//!
//! Wraps `tracing` to provide JSON-formatted file output (NDJSON, daily
//! rotation) next to human-readable console output, with `RUST_LOG`
//! overriding the configured level.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global structured logger.
///
/// Writes to the console and to `<log_dir>/<file_prefix>.log.YYYY-MM-DD`.
/// Processes that run side by side must use distinct prefixes.
pub fn init_logger<P: AsRef<Path>>(log_dir: P, level: &str, file_prefix: &str) {
    let log_dir = log_dir.as_ref();
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        log_dir,
        format!("{file_prefix}.log"),
    );

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_appender)
        .with_ansi(false);

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_ansi(true);

    let installed = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_ok();
    if installed {
        tracing::info!(dir = %log_dir.display(), prefix = file_prefix, filter = level, "Logging initialized");
    } else {
        tracing::debug!(prefix = file_prefix, "Global logger already set; keeping it");
    }
}

/// Console-only logger for short-lived interactive commands.
pub fn init_console_logger(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
