//! Application configuration structures.

use beacon_core::TelemetryConfig;
use beacon_jobs::JobsConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// URL selecting the in-memory record store.
pub const MEMORY_DATABASE_URL: &str = "memory://";

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Record store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Job queue configuration.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "beacon".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Connection URL; `memory://` keeps jobs in process memory.
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite://beacon.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_connect_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl DatabaseConfig {
    /// Returns the connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns true if the in-memory store is selected.
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }
}
