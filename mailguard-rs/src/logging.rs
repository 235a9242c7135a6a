//! Logging setup

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{GuardError, Result};

/// Filter used when `RUST_LOG` is not set
pub fn default_filter(config: &LoggingConfig) -> String {
    format!("mailguard_rs={},mailguard={}", config.level, config.level)
}

/// Install the global subscriber; logs go to stderr so stdout stays usable
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let registry = tracing_subscriber::registry().with(filter);
    let layer = fmt::layer().with_writer(std::io::stderr);

    let result = match config.format.as_str() {
        "json" => registry.with(layer.json()).try_init(),
        "compact" => registry.with(layer.compact()).try_init(),
        _ => registry.with(layer.pretty()).try_init(),
    };

    result.map_err(|e| GuardError::Config(format!("Failed to initialize logging: {}", e)))
}
