//! Job processor: the reserve, validate, dispatch, finalize lifecycle.

use crate::config::JobsConfig;
use crate::error::{JobError, JobResult};
use crate::export::ExportFileStore;
use crate::job::{validate_payload, JobContext, JobData, JobHandler};
use crate::payload::TypedJobHandler;
use crate::record::{JobRecord, NewJobRecord, QUEUES_COLLECTION};
use crate::registry::JobRegistry;
use crate::store::RecordStore;
use crate::worker::{PoolTimeouts, WorkerPool};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Observable state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Record present with no live lease.
    Queued,
    /// Record present under a live lease.
    Processing,
    /// Record gone; successful jobs are deleted.
    Completed,
    /// Record gone without leaving export output.
    Failed,
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs the single-job lifecycle. Shared by pool workers and the sequential path.
#[derive(Clone)]
pub(crate) struct JobExecutor {
    store: Arc<dyn RecordStore>,
    registry: Arc<JobRegistry>,
    lease: Duration,
}

impl JobExecutor {
    pub(crate) fn new(
        store: Arc<dyn RecordStore>,
        registry: Arc<JobRegistry>,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            lease,
        }
    }

    /// Claims, executes and finalizes one record.
    ///
    /// `record` reflects the outcome: removed records keep their last state,
    /// failed ones carry the incremented attempt count.
    pub(crate) async fn run(
        &self,
        record: &mut JobRecord,
        worker_id: Option<usize>,
    ) -> JobResult<()> {
        if record.id.is_empty() {
            return Err(JobError::InvalidRecord("job record has no id".to_string()));
        }
        if record.collection != QUEUES_COLLECTION {
            return Err(JobError::InvalidRecord(format!(
                "record {} belongs to '{}', expected '{}'",
                record.id, record.collection, QUEUES_COLLECTION
            )));
        }

        let now = Utc::now();
        if record.is_reserved(self.lease, now) {
            debug!(job_id = %record.id, reserved_at = %record.reserved_at, "Job already reserved");
            return Err(JobError::AlreadyReserved {
                job_id: record.id.clone(),
            });
        }

        let (previous_lease, previous_updated) = (record.reserved_at.clone(), record.updated);
        record.reserve(now);
        if let Err(e) = self.store.save(record).await {
            record.reserved_at = previous_lease;
            record.updated = previous_updated;
            error!(
                job_id = %record.id,
                attempts = record.attempts,
                error = %e,
                "Failed to reserve job"
            );
            return Err(JobError::Reservation {
                job_id: record.id.clone(),
                source: e,
            });
        }

        match self.execute(record, worker_id).await {
            Ok(()) => self.complete(record).await,
            Err(err) => {
                self.fail(record, &err).await;
                Err(err)
            }
        }
    }

    async fn execute(&self, record: &JobRecord, worker_id: Option<usize>) -> JobResult<()> {
        let job = JobData::from_record(record)?;
        let handler = self.registry.get_handler(&job.job_type)?;
        let ctx = JobContext::new(&job, worker_id, self.store.clone());

        ctx.log_start(&format!("Processing {} job: {}", job.job_type, job.name));

        let result = match AssertUnwindSafe(handler.handle(&ctx, &job))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let err = JobError::Panicked(panic_message(panic.as_ref()));
                ctx.log_error(&err, "Job handler panic recovered");
                Err(err)
            }
        };

        match &result {
            Ok(()) => ctx.log_end("Job processed successfully"),
            Err(e) => ctx.log_error(e, "Job processing failed"),
        }
        result
    }

    async fn complete(&self, record: &JobRecord) -> JobResult<()> {
        if let Err(e) = self.store.delete(record).await {
            error!(
                job_id = %record.id,
                attempts = record.attempts,
                error = %e,
                "Failed to delete completed job"
            );
            return Err(JobError::Completion {
                job_id: record.id.clone(),
                source: e,
            });
        }

        info!(job_id = %record.id, job_name = %record.name, "Job completed and removed from queue");
        Ok(())
    }

    /// Records a failed attempt. A save failure is logged, not returned.
    async fn fail(&self, record: &mut JobRecord, cause: &JobError) {
        record.mark_failed(Utc::now());

        if let Err(e) = self.store.save(record).await {
            error!(
                job_id = %record.id,
                attempts = record.attempts,
                cause = %cause,
                error = %e,
                "Failed to update failed job record"
            );
            return;
        }

        warn!(
            job_id = %record.id,
            attempts = record.attempts,
            error = %cause,
            "Job failed and was released for retry"
        );
    }
}

/// Owns the registry and the worker pool and exposes job processing.
///
/// Construct once at startup and share as `Arc<JobProcessor>`.
pub struct JobProcessor {
    config: JobsConfig,
    store: Arc<dyn RecordStore>,
    registry: Arc<JobRegistry>,
    executor: JobExecutor,
    pool: Option<WorkerPool>,
    exports: Option<Arc<dyn ExportFileStore>>,
}

impl JobProcessor {
    /// Creates a processor and starts its worker pool.
    ///
    /// Must be called within a Tokio runtime.
    pub fn new(store: Arc<dyn RecordStore>, config: JobsConfig) -> Self {
        let mut processor = Self::sequential(store, config);
        processor.pool = Some(WorkerPool::new(
            processor.executor.clone(),
            processor.config.max_workers,
            PoolTimeouts::from(&processor.config),
        ));
        processor
    }

    /// Creates a processor without a pool; batches run one job at a time.
    pub fn sequential(store: Arc<dyn RecordStore>, config: JobsConfig) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let executor =
            JobExecutor::new(store.clone(), registry.clone(), config.reservation_timeout());

        Self {
            config,
            store,
            registry,
            executor,
            pool: None,
            exports: None,
        }
    }

    /// Attaches the export file store consulted by [`JobProcessor::status`].
    #[must_use]
    pub fn with_export_store(mut self, exports: Arc<dyn ExportFileStore>) -> Self {
        self.exports = Some(exports);
        self
    }

    /// Registers a handler for its job type.
    pub fn register_handler(&self, handler: Arc<dyn JobHandler>) -> JobResult<()> {
        self.registry.register(handler)
    }

    /// Registers a typed handler.
    pub fn register_typed<H: TypedJobHandler>(&self, handler: H) -> JobResult<()> {
        self.registry.register_typed(handler)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    /// Lease window shared with the queue scanner.
    pub fn lease_window(&self) -> Duration {
        self.config.reservation_timeout()
    }

    pub fn pool(&self) -> Option<&WorkerPool> {
        self.pool.as_ref()
    }

    /// Runs the full lifecycle for one record.
    pub async fn process_job(&self, record: &mut JobRecord) -> JobResult<()> {
        self.executor.run(record, None).await
    }

    /// Processes records one after another on the calling task.
    pub async fn process_jobs(&self, mut records: Vec<JobRecord>) -> Vec<JobResult<()>> {
        let mut results = Vec::with_capacity(records.len());
        for record in &mut records {
            results.push(self.process_job(record).await);
        }
        results
    }

    /// Processes records through the worker pool.
    ///
    /// `max_workers` is advisory; the pool's own size is used. Falls back to
    /// [`JobProcessor::process_jobs`] when the processor has no pool.
    pub async fn process_jobs_concurrently(
        &self,
        records: Vec<JobRecord>,
        max_workers: usize,
    ) -> Vec<JobResult<()>> {
        if records.is_empty() {
            return Vec::new();
        }

        match &self.pool {
            Some(pool) => {
                if max_workers != pool.size() {
                    debug!(
                        requested = max_workers,
                        pool_size = pool.size(),
                        "Ignoring requested worker count, using pool size"
                    );
                }
                pool.process_jobs(records).await
            }
            None => self.process_jobs(records).await,
        }
    }

    /// Shuts the worker pool down within `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> JobResult<()> {
        match &self.pool {
            Some(pool) => pool.shutdown(deadline).await,
            None => Ok(()),
        }
    }

    /// Validates `payload` and stores it as a new unreserved job.
    pub async fn enqueue(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        payload: &Value,
    ) -> JobResult<JobRecord> {
        let Value::Object(map) = payload else {
            return Err(JobError::InvalidPayload(
                "job payload must be a JSON object".to_string(),
            ));
        };
        let job_type = validate_payload(map)?.to_string();

        let record = self
            .store
            .create(NewJobRecord::new(name, description, serde_json::to_string(payload)?))
            .await?;

        info!(job_id = %record.id, job_type = %job_type, "Job enqueued");
        Ok(record)
    }

    /// Reports whether a job is waiting, leased, or gone.
    ///
    /// With an export store attached, a gone job is `Completed` only if it
    /// left an export file and `Failed` otherwise.
    pub async fn status(&self, job_id: &str) -> JobResult<JobStatus> {
        let status = match self.store.find_by_id(job_id).await? {
            None => match &self.exports {
                None => JobStatus::Completed,
                Some(exports) => match exports.find_by_job_id(job_id).await? {
                    Some(_) => JobStatus::Completed,
                    None => JobStatus::Failed,
                },
            },
            Some(record) if record.is_reserved(self.lease_window(), Utc::now()) => {
                JobStatus::Processing
            }
            Some(_) => JobStatus::Queued,
        };
        Ok(status)
    }
}

impl std::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("registry", &self.registry)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
