//! Tracing subscriber set-up: readable stderr output plus a daily log file.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::etl::types::ETLError;
use crate::settings::Settings;

pub const LOG_FILE_PREFIX: &str = "statement-etl.log";

/// Installs the global subscriber.
///
/// Keep the returned guard alive for as long as file output is wanted;
/// dropping it flushes and stops the file writer.
pub fn init(settings: &Settings) -> Result<WorkerGuard, ETLError> {
    std::fs::create_dir_all(&settings.log_dir)?;

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(console_filter(&settings.log_level));

    let file_appender = tracing_appender::rolling::daily(&settings.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| ETLError::Configuration(format!("logging already initialised: {}", e)))?;

    Ok(guard)
}

/// `RUST_LOG` wins over the configured level.
fn console_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

