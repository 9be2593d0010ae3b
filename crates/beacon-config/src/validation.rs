//! Configuration validation.
//!
//! Collects every problem instead of stopping at the first so a bad
//! deployment reports all of them at startup.

use crate::AppConfig;
use beacon_jobs::{JobsConfig, MAX_EXPORT_EXPIRATION_DAYS};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;

/// Configuration validation error variants.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    /// Database URL is empty.
    MissingDatabaseUrl,
    /// Pool must allow at least one connection.
    ZeroConnections,
    /// Batch size must be positive.
    ZeroBatchSize,
    /// Lease window must be positive.
    ZeroReservationTimeout,
    /// Scan schedule is not a valid cron expression.
    InvalidSchedule { expression: String, message: String },
    /// Timeout value must be positive.
    NonPositiveTimeout { name: String },
    /// Export files must expire within a century.
    ExportExpirationTooLong { days: u32 },
}

impl fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDatabaseUrl => write!(f, "Database URL is required"),
            Self::ZeroConnections => {
                write!(f, "Database max_connections must be at least 1")
            }
            Self::ZeroBatchSize => write!(f, "Job batch_size must be greater than 0"),
            Self::ZeroReservationTimeout => {
                write!(f, "Job reservation_timeout_minutes must be greater than 0")
            }
            Self::InvalidSchedule {
                expression,
                message,
            } => {
                write!(f, "Invalid scan schedule '{}': {}", expression, message)
            }
            Self::NonPositiveTimeout { name } => {
                write!(f, "Timeout '{}' must be positive", name)
            }
            Self::ExportExpirationTooLong { days } => write!(
                f,
                "Job export_file_expiration_days must be at most {}, got {}",
                MAX_EXPORT_EXPIRATION_DAYS, days
            ),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validates the entire application configuration.
    ///
    /// Returns Ok(()) if valid, or Err with all validation errors found.
    pub fn validate(config: &AppConfig) -> Result<(), Vec<ConfigValidationError>> {
        let mut errors = Vec::new();

        if config.database.url.trim().is_empty() {
            errors.push(ConfigValidationError::MissingDatabaseUrl);
        }
        if config.database.max_connections == 0 {
            errors.push(ConfigValidationError::ZeroConnections);
        }

        Self::validate_jobs(&config.jobs, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_jobs(config: &JobsConfig, errors: &mut Vec<ConfigValidationError>) {
        if config.batch_size == 0 {
            errors.push(ConfigValidationError::ZeroBatchSize);
        }
        if config.reservation_timeout_minutes == 0 {
            errors.push(ConfigValidationError::ZeroReservationTimeout);
        }
        if let Err(e) = Schedule::from_str(&config.scan_schedule) {
            errors.push(ConfigValidationError::InvalidSchedule {
                expression: config.scan_schedule.clone(),
                message: e.to_string(),
            });
        }

        // send_timeout_secs may be 0: enqueue then only succeeds when a slot is free
        for (name, value) in [
            ("jobs.result_timeout_secs", config.result_timeout_secs),
            ("jobs.result_send_timeout_secs", config.result_send_timeout_secs),
            ("jobs.shutdown_timeout_secs", config.shutdown_timeout_secs),
        ] {
            if value == 0 {
                errors.push(ConfigValidationError::NonPositiveTimeout {
                    name: name.to_string(),
                });
            }
        }

        if config.export_file_expiration_days > MAX_EXPORT_EXPIRATION_DAYS {
            errors.push(ConfigValidationError::ExportExpirationTooLong {
                days: config.export_file_expiration_days,
            });
        }
    }
}

/// Formats validation errors for display.
pub fn format_validation_errors(errors: &[ConfigValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {}", e))
        .collect::<Vec<_>>()
        .join("\n")
}
