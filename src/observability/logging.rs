//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber once at startup
//! - Choose the output format (JSON for production, pretty for development)
//! - Configure the level from config, overridable by `RUST_LOG`

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

/// Build the level filter: `RUST_LOG` if set and valid, else the configured level.
pub fn env_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    })
}

/// Install the global subscriber. A second call is reported and ignored.
pub fn init_logging(config: &ObservabilityConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "Logging already initialized");
    }
}
