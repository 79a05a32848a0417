//! Structured logging setup.

use crate::config::LoggingConfig;
use crate::error::{ChainError, Result};
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the configured
/// level. Fails when a subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };
    installed.map_err(|e| ChainError::ConfigError(format!("logging already initialized: {}", e)))?;

    tracing::info!(format = %config.format, level = %config.level, "logging initialized");
    Ok(())
}
