//! Logging setup and configuration

use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directives appended to the configured level unless `RUST_LOG` is set.
///
/// russh logs every packet at debug level, which drowns out session events.
const QUIET_DEPENDENCIES: &[&str] = &["russh=warn"];

/// Build the log filter: `RUST_LOG` wins, otherwise `default_level` plus
/// [`QUIET_DEPENDENCIES`]
pub fn log_filter(default_level: &str) -> crate::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut directives = vec![default_level.to_string()];
    directives.extend(QUIET_DEPENDENCIES.iter().map(|d| d.to_string()));

    EnvFilter::try_new(directives.join(","))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter '{}': {}", default_level, e)))
}

/// Setup tracing subscriber for the application
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = log_filter(default_level)?;
    let directives = filter.to_string();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .map_err(|e| crate::Error::Config(format!("Logging already initialized: {}", e)))?;

    if std::env::var_os("RUST_LOG").is_some() {
        debug!(filter = %directives, "RUST_LOG overrides configured level '{}'", default_level);
    } else {
        debug!(filter = %directives, "Logging initialized");
    }
    Ok(())
}
