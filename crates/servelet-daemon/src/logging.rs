//! Logging setup

use anyhow::{anyhow, Context};
use servelet_core::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Environment variable holding a full filter directive, overriding the level
pub const LOG_FILTER_ENV: &str = "SERVELET_LOG";

/// Install the global subscriber
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log level: {}", config.level))?;

    let result = match config.format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };
    result.map_err(|e| anyhow!("Failed to set subscriber: {}", e))
}
