//! Tracing subscriber setup
//!
//! ```text
//! Registry
//!   ├── EnvFilter (RUST_LOG, else the configured level)
//!   └── Fmt Layer (pretty or JSON console output)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_s3_engine::config::LoggingConfig;
//! use mizuchi_s3_engine::telemetry::init_subscriber;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! init_subscriber(&LoggingConfig::default())?;
//! tracing::info!("Subscriber is now active");
//! # Ok(())
//! # }
//! ```

use crate::config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to set global subscriber (may already be initialized): {0}")]
    AlreadyInitialized(String),
}

/// Build the filter: `RUST_LOG` when set, else the configured level
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    EnvFilter::try_new(&config.level).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.level.clone(),
        reason: e.to_string(),
    })
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_subscriber(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(config)?;

    let result = match config.format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(std::io::stderr);
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(filter).with(fmt_layer),
            )
        }
        LogFormat::Pretty => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_writer(std::io::stderr);
            tracing::subscriber::set_global_default(
                tracing_subscriber::registry().with(filter).with(fmt_layer),
            )
        }
    };

    result.map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}
