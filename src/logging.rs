//! Logging initialisation.

use crate::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Builds the log filter: `RUST_LOG` wins, otherwise the configured verbosity.
pub fn filter_for(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.verbosity.filter_directive()))
}

/// Installs the global `tracing` subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init_logging(
    config: &LoggingConfig,
) -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    tracing_subscriber::fmt()
        .with_env_filter(filter_for(config))
        .try_init()
}
