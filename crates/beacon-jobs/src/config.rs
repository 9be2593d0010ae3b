//! Job queue configuration.

use crate::export::DEFAULT_EXPORT_EXPIRATION_DAYS;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of pool workers when the configured count is not positive.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Configuration for the job queue system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Number of pool workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Maximum records fetched per queue scan.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Lease window in minutes.
    #[serde(default = "default_reservation_timeout")]
    pub reservation_timeout_minutes: u64,

    /// Cron expression (with seconds field) driving the queue scan.
    #[serde(default = "default_scan_schedule")]
    pub scan_schedule: String,

    /// How long a batch submission waits for room in the job channel, per job.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// How long a batch waits for each result.
    #[serde(default = "default_result_timeout")]
    pub result_timeout_secs: u64,

    /// How long a worker waits for room in the result channel.
    #[serde(default = "default_result_send_timeout")]
    pub result_send_timeout_secs: u64,

    /// Graceful shutdown deadline.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Days an export file is kept before it expires.
    #[serde(default = "default_export_file_expiration")]
    pub export_file_expiration_days: u32,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            batch_size: default_batch_size(),
            reservation_timeout_minutes: default_reservation_timeout(),
            scan_schedule: default_scan_schedule(),
            send_timeout_secs: default_send_timeout(),
            result_timeout_secs: default_result_timeout(),
            result_send_timeout_secs: default_result_send_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            export_file_expiration_days: default_export_file_expiration(),
        }
    }
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_batch_size() -> usize {
    50
}

fn default_reservation_timeout() -> u64 {
    5
}

fn default_scan_schedule() -> String {
    // every minute, on the minute
    "0 * * * * *".to_string()
}

fn default_send_timeout() -> u64 {
    30
}

fn default_result_timeout() -> u64 {
    300 // 5 minutes
}

fn default_result_send_timeout() -> u64 {
    10
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_export_file_expiration() -> u32 {
    DEFAULT_EXPORT_EXPIRATION_DAYS
}

impl JobsConfig {
    /// Returns the lease window as Duration.
    pub fn reservation_timeout(&self) -> Duration {
        Duration::from_secs(self.reservation_timeout_minutes.saturating_mul(60))
    }

    /// Returns the per-job enqueue timeout as Duration.
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Returns the per-result wait as Duration.
    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_secs)
    }

    /// Returns the worker result send timeout as Duration.
    pub fn result_send_timeout(&self) -> Duration {
        Duration::from_secs(self.result_send_timeout_secs)
    }

    /// Returns the shutdown deadline as Duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
