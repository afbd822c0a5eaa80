//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` formatter according to [`LoggingConfig`].
//! The crate itself only emits `tracing` events; calling [`init_logging`] is
//! left to the binary that embeds it.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Build the filter for a logging config: the configured level, unless
/// `RUST_LOG` is set and overrides are allowed.
pub fn build_filter(config: &LoggingConfig) -> EnvFilter {
    let fallback = || EnvFilter::new(config.log_level.as_str().to_ascii_lowercase());
    if config.env_override {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback())
    } else {
        fallback()
    }
}

/// Install the global subscriber.
///
/// # Errors
/// `ConfigError` if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(build_filter(config))
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;
    tracing::info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}
