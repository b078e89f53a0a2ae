use crate::config::{LogFormat, LoggingConfig};
use crate::error::{GateError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Target carrying one line per admission decision
pub const AUDIT_TARGET: &str = "sitegate::audit";

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| GateError::Config(format!("Invalid log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);

    let installed = match config.format {
        LogFormat::Compact => builder.with_target(true).compact().try_init(),
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .flatten_event(true)
            .try_init(),
    };

    installed
        .map_err(|e| GateError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    info!(format = ?config.format, "Tracing initialized");
    Ok(())
}
