//! Tracing subscriber setup.

use crate::config::LoggingSettings;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Output goes to
/// stdout unless a log file is configured.
pub fn setup_logging(config: &LoggingSettings) -> Result<()> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    let file = config
        .file_path
        .as_deref()
        .map(|path| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {path}"))
        })
        .transpose()?;

    match (config.json_format, file) {
        (true, None) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?,
        (false, None) => registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?,
        (true, Some(file)) => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(Mutex::new(file))
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?,
        (false, Some(file)) => registry
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()?,
    }

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}
