//! Periodic queue scan feeding the processor.

use crate::error::{JobError, JobResult};
use crate::processor::JobProcessor;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Outcome of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Fetches unreserved or expired jobs on a cron schedule and submits them as a batch.
pub struct QueueScanner {
    id: String,
    processor: Arc<JobProcessor>,
    schedule: Schedule,
    batch_size: usize,

    /// Shutdown signal sender.
    shutdown_tx: broadcast::Sender<()>,

    running: AtomicBool,
    stopping: AtomicBool,
}

impl QueueScanner {
    /// Builds a scanner from the processor's configuration.
    pub fn new(processor: Arc<JobProcessor>) -> JobResult<Self> {
        let config = processor.config();
        let schedule = Schedule::from_str(&config.scan_schedule).map_err(|e| {
            JobError::Configuration(format!(
                "Invalid cron expression '{}': {}",
                config.scan_schedule, e
            ))
        })?;
        let batch_size = config.batch_size;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            id: format!("queue-scanner-{}", Uuid::new_v4()),
            processor,
            schedule,
            batch_size,
            shutdown_tx,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
        })
    }

    /// Fetches one batch of available jobs and processes it.
    pub async fn scan_once(&self) -> JobResult<ScanReport> {
        let window = chrono::Duration::from_std(self.processor.lease_window())
            .map_err(|e| JobError::Configuration(format!("Invalid reservation timeout: {e}")))?;
        let expired_before = Utc::now()
            .checked_sub_signed(window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let records = match self
            .processor
            .store()
            .find_available(expired_before, self.batch_size, 0)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(scanner_id = %self.id, error = %e, "Failed to fetch queued jobs");
                return Err(e.into());
            }
        };

        if records.is_empty() {
            debug!(scanner_id = %self.id, "No queued jobs to process");
            return Ok(ScanReport::default());
        }

        let workers = self.processor.config().max_workers;
        info!(scanner_id = %self.id, jobs = records.len(), workers, "Processing queued jobs");

        let job_ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let results = self
            .processor
            .process_jobs_concurrently(records, workers)
            .await;

        let mut report = ScanReport {
            total: results.len(),
            ..ScanReport::default()
        };
        for (job_id, result) in job_ids.iter().zip(&results) {
            match result {
                Ok(()) => report.successful += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(scanner_id = %self.id, job_id = %job_id, error = %e, "Queued job failed");
                }
            }
        }

        info!(
            scanner_id = %self.id,
            total_jobs = report.total,
            successful = report.successful,
            failed = report.failed,
            workers,
            "Queue processing completed"
        );

        Ok(report)
    }

    /// Runs scans on the schedule until [`QueueScanner::stop`] is called.
    pub async fn start(&self) -> JobResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(JobError::Configuration(
                "Queue scanner already running".to_string(),
            ));
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(scanner_id = %self.id, batch_size = self.batch_size, "Starting queue scanner");

        while !self.stopping.load(Ordering::SeqCst) {
            let Some(next) = self.schedule.upcoming(Utc).next() else {
                warn!(scanner_id = %self.id, "Scan schedule has no upcoming runs");
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(scanner_id = %self.id, "Received shutdown signal");
                    break;
                }

                () = tokio::time::sleep(wait) => {
                    if let Err(e) = self.scan_once().await {
                        error!(scanner_id = %self.id, error = %e, "Queue scan failed");
                    }
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!(scanner_id = %self.id, "Queue scanner stopped");
        Ok(())
    }

    /// Stop the scanner. A scan already in progress finishes first.
    pub fn stop(&self) {
        info!(scanner_id = %self.id, "Stopping queue scanner...");
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the scanner ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}
