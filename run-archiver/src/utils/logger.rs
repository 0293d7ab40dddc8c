//! Logging configuration using tracing.

use crate::config::{LogConfig, LogOutput};
use anyhow::Context;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging from the `[log]` section.
///
/// `RUST_LOG` takes precedence over the configured level. The file sink
/// appends and never writes ANSI escapes.
pub fn init(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout_layer = matches!(config.output, LogOutput::Stdout | LogOutput::Both)
        .then(|| tracing_subscriber::fmt::layer().with_target(false));

    let file_layer = match config.output {
        LogOutput::File | LogOutput::Both => {
            let path = config
                .file
                .as_ref()
                .context("log.output requires log.file to be set")?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        LogOutput::Stdout => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(())
}
