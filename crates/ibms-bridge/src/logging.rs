//! Logging setup
//!
//! Console output plus a daily-rotated file (`<dir>/<file>.YYYY-MM-DD`),
//! keeping the newest `max_files` files. The returned guard must stay alive
//! for the file writer to flush.

use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

pub const DEFAULT_FILTER: &str = "ibms_bridge=info,bridge_runtime=info";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// `RUST_LOG` first, then the configured level, then the default
pub fn env_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or(DEFAULT_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Daily appender that deletes the oldest files beyond `max_files`
pub fn file_appender(config: &LoggingConfig) -> io::Result<RollingFileAppender> {
    std::fs::create_dir_all(&config.directory)?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_name)
        .max_log_files(config.max_files.max(1))
        .build(&config.directory)
        .map_err(io::Error::other)
}

pub fn setup_logging(config: &LoggingConfig) -> io::Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config)?);

    tracing_subscriber::registry()
        .with(env_filter(config.level.as_deref()))
        .with(fmt::layer().with_timer(ChronoLocal::new(TIME_FORMAT.to_string())))
        .with(
            fmt::layer()
                .with_timer(ChronoLocal::new(TIME_FORMAT.to_string()))
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .map_err(io::Error::other)?;

    Ok(guard)
}
