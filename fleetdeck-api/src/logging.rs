//! Logging configuration module
//! Structured logging to the console with an optional rolling JSON file

use serde::{Deserialize, Serialize};
use std::io;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive, overridden by RUST_LOG
    pub level: String,
    /// Directory for rolling log files, console only when unset
    pub file_path: Option<String>,
    pub rotation: LogRotation,
    /// JSON output on the console as well as in files
    pub json_format: bool,
}

/// Log rotation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    Daily,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            rotation: LogRotation::Daily,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }

    /// Install the global subscriber
    ///
    /// The returned guard flushes the file writer and must be held for the
    /// life of the process.
    pub fn init(&self) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

        let console_layer = if self.json_format {
            fmt::layer()
                .json()
                .with_target(true)
                .with_writer(io::stdout)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(false)
                .with_ansi(true)
                .with_writer(io::stdout)
                .boxed()
        };
        layers.push(console_layer);

        let mut guard = None;
        if let Some(ref path) = self.file_path {
            let file_appender = match self.rotation {
                LogRotation::Hourly => rolling::hourly(path, "fleetdeck.log"),
                LogRotation::Daily => rolling::daily(path, "fleetdeck.log"),
                LogRotation::Never => rolling::never(path, "fleetdeck.log"),
            };
            let (writer, file_guard) = non_blocking(file_appender);
            guard = Some(file_guard);

            layers.push(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_thread_ids(true)
                    .with_ansi(false)
                    .json()
                    .with_writer(writer)
                    .boxed(),
            );
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(self.env_filter())
            .try_init()?;

        tracing::info!(level = %self.level, file = ?self.file_path, "Logging initialized");
        Ok(guard)
    }
}
