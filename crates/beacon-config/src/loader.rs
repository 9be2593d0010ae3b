//! Configuration loader with layered sources.

use crate::validation::{format_validation_errors, ConfigValidator};
use crate::AppConfig;
use beacon_core::{BeaconError, BeaconResult};
use beacon_jobs::JobsConfig;
use config::{Config, ConfigError, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Plain variables that override the layered job settings.
const JOB_MAX_WORKERS: &str = "JOB_MAX_WORKERS";
const JOB_BATCH_SIZE: &str = "JOB_BATCH_SIZE";
const JOB_RESERVATION_TIMEOUT: &str = "JOB_RESERVATION_TIMEOUT";
const EXPORT_FILE_EXPIRATION_DAYS: &str = "EXPORT_FILE_EXPIRATION_DAYS";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `BEACON__` prefix (e.g. `BEACON__JOBS__MAX_WORKERS`)
    /// 5. `JOB_MAX_WORKERS`, `JOB_BATCH_SIZE`, `JOB_RESERVATION_TIMEOUT`,
    ///    `EXPORT_FILE_EXPIRATION_DAYS`
    pub fn new(config_dir: impl Into<PathBuf>) -> BeaconResult<Self> {
        // Load .env file if present
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir, |key| std::env::var(key).ok())?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> BeaconResult<Self> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> BeaconResult<()> {
        let new_config = Self::load_config(&self.config_dir, |key| std::env::var(key).ok())?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from `config_dir`, reading variables through `lookup`.
    fn load_config(
        config_dir: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> BeaconResult<AppConfig> {
        let environment =
            lookup("BEACON_ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = config_dir.join(format!("{name}.toml"));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("BEACON")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error_to_beacon_error)?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .map_err(config_error_to_beacon_error)?;

        app_config.app.environment = environment;
        apply_job_overrides(&mut app_config.jobs, lookup);

        ConfigValidator::validate(&app_config).map_err(|errors| {
            BeaconError::Configuration(format!(
                "Configuration validation failed:\n{}",
                format_validation_errors(&errors)
            ))
        })?;

        Ok(app_config)
    }
}

/// Applies the plain `JOB_*` variables. Unparseable values are ignored.
fn apply_job_overrides(jobs: &mut JobsConfig, lookup: impl Fn(&str) -> Option<String>) {
    let read = |key: &str| -> Option<u64> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparseable job setting");
                None
            }
        }
    };

    if let Some(workers) = read(JOB_MAX_WORKERS).and_then(|v| usize::try_from(v).ok()) {
        jobs.max_workers = workers;
    }
    if let Some(batch) = read(JOB_BATCH_SIZE).and_then(|v| usize::try_from(v).ok()) {
        jobs.batch_size = batch;
    }
    if let Some(minutes) = read(JOB_RESERVATION_TIMEOUT) {
        jobs.reservation_timeout_minutes = minutes;
    }
    if let Some(days) = read(EXPORT_FILE_EXPIRATION_DAYS).and_then(|v| u32::try_from(v).ok()) {
        jobs.export_file_expiration_days = days;
    }
}

fn config_error_to_beacon_error(err: ConfigError) -> BeaconError {
    BeaconError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn load(dir: &TempDir, env: &HashMap<String, String>) -> BeaconResult<AppConfig> {
        ConfigLoader::load_config(dir.path(), |key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_files() {
        let dir = TempDir::new().unwrap();
        let config = load(&dir, &HashMap::new()).unwrap();

        assert_eq!(config.app.environment, "development");
        assert_eq!(config.jobs.max_workers, 5);
        assert_eq!(config.jobs.batch_size, 50);
        assert_eq!(config.jobs.reservation_timeout_minutes, 5);
    }

    #[test]
    fn test_layered_files() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            "[jobs]\nmax_workers = 3\nbatch_size = 20\n\n[database]\nurl = \"memory://\"\n",
        )
        .unwrap();
        fs::write(dir.path().join("staging.toml"), "[jobs]\nbatch_size = 40\n").unwrap();
        fs::write(dir.path().join("local.toml"), "[jobs]\nresult_timeout_secs = 60\n").unwrap();

        let config = load(&dir, &vars(&[("BEACON_ENVIRONMENT", "staging")])).unwrap();

        assert_eq!(config.app.environment, "staging");
        assert_eq!(config.jobs.max_workers, 3);
        assert_eq!(config.jobs.batch_size, 40);
        assert_eq!(config.jobs.result_timeout_secs, 60);
        assert!(config.database.is_memory());
    }

    #[test]
    fn test_job_variables_override_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), "[jobs]\nmax_workers = 3\n").unwrap();

        let env = vars(&[
            ("JOB_MAX_WORKERS", "8"),
            ("JOB_BATCH_SIZE", "not-a-number"),
            ("JOB_RESERVATION_TIMEOUT", "15"),
            ("EXPORT_FILE_EXPIRATION_DAYS", "7"),
        ]);
        let config = load(&dir, &env).unwrap();

        assert_eq!(config.jobs.max_workers, 8);
        assert_eq!(config.jobs.batch_size, 50);
        assert_eq!(config.jobs.reservation_timeout_minutes, 15);
        assert_eq!(config.jobs.export_file_expiration_days, 7);
    }

    #[test]
    fn test_oversized_expiration_days_ignored() {
        let dir = TempDir::new().unwrap();
        let env = vars(&[("EXPORT_FILE_EXPIRATION_DAYS", "99999999999")]);

        let config = load(&dir, &env).unwrap();
        assert_eq!(config.jobs.export_file_expiration_days, 30);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), "[jobs]\nbatch_size = 0\n").unwrap();

        let err = load(&dir, &HashMap::new()).unwrap_err();
        assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("default.toml"), "[jobs\nmax_workers = ").unwrap();

        assert!(load(&dir, &HashMap::new()).is_err());
    }

    #[tokio::test]
    async fn test_loader_get_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("default.toml");
        fs::write(&path, "[database]\nurl = \"memory://\"\n").unwrap();

        let loader = ConfigLoader::new(dir.path()).unwrap();
        assert!(loader.get().await.database.is_memory());

        fs::write(&path, "[database]\nurl = \"sqlite::memory:\"\n").unwrap();
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.database.url, "sqlite::memory:");
    }
}
