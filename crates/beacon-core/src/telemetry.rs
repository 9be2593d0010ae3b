//! Tracing subscriber initialisation.

use crate::{BeaconError, BeaconResult};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to the startup event.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Filter directive used when `RUST_LOG` is not set.
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

fn default_service_name() -> String {
    "beacon".to_string()
}

fn default_filter() -> String {
    "info,beacon=debug".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            filter: default_filter(),
            json: false,
        }
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Returns an error if
/// a global subscriber is already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> BeaconResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| BeaconError::Configuration(format!("Invalid log filter: {}", e)))?;

    let result = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| BeaconError::Internal(format!("Failed to install tracing subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        json = config.json,
        "Telemetry initialized"
    );

    Ok(())
}
