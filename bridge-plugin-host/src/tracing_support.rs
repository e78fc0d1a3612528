//! Tracing and logging setup.
//!
//! Hosts call one of the `init_subscriber` functions once at startup.
//! `RUST_LOG` wins over the configured level when set.

use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TracingFormat {
    /// Human-readable format with colors (default for development).
    Pretty,

    /// Compact format without colors.
    Compact,

    /// JSON format (recommended for production).
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// Filter directive used when `RUST_LOG` is not set, e.g. `debug` or
    /// `bridge_plugin_host=trace`.
    pub level: String,

    pub format: TracingFormat,

    /// Include target module names in output.
    pub target: bool,

    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: TracingFormat::Pretty,
            target: true,
            thread_ids: false,
        }
    }
}

/// Initialize a subscriber with default settings.
///
/// Returns an error if a global subscriber is already installed.
pub fn init_subscriber() -> Result<(), tracing_subscriber::util::TryInitError> {
    init_subscriber_with_config(&TracingConfig::default())
}

/// Initialize a subscriber from configuration.
pub fn init_subscriber_with_config(
    config: &TracingConfig,
) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        TracingFormat::Pretty => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .try_init(),
        TracingFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .try_init(),
        TracingFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(config.target)
                    .with_thread_ids(config.thread_ids),
            )
            .try_init(),
    }
}
