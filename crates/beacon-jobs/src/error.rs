//! Job error types.

use crate::store::StoreError;
use thiserror::Error;

/// Result type for job operations.
pub type JobResult<T> = Result<T, JobError>;

/// Job-related errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// The record is not a usable queue entry.
    #[error("Invalid job record: {0}")]
    InvalidRecord(String),

    /// Another attempt holds a live lease on the record.
    #[error("Job {job_id} is already reserved")]
    AlreadyReserved { job_id: String },

    /// Persisting the lease failed; the stored record is untouched.
    #[error("Failed to reserve job {job_id}: {source}")]
    Reservation {
        job_id: String,
        #[source]
        source: StoreError,
    },

    /// Payload could not be decoded or has the wrong shape.
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    /// No handler registered for the job type.
    #[error("No handler registered for job type: {0}")]
    NoHandler(String),

    /// Handler reported an error.
    #[error("Job handler failed: {0}")]
    HandlerFailed(String),

    /// Handler panicked; the panic was contained.
    #[error("Job handler panicked: {0}")]
    Panicked(String),

    /// The job ran but its record could not be removed.
    #[error("Job {job_id} completed but could not be removed: {source}")]
    Completion {
        job_id: String,
        #[source]
        source: StoreError,
    },

    /// Record store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The pool has begun shutdown.
    #[error("pool is shutdown")]
    PoolShutdown,

    /// The job channel stayed full for the whole send timeout.
    #[error("Timed out enqueueing job {job_id} after {timeout_secs}s")]
    EnqueueTimeout { job_id: String, timeout_secs: u64 },

    /// No result arrived within the result timeout.
    #[error("Timed out waiting for job result after {0}s")]
    ResultTimeout(u64),

    /// Workers did not finish before the shutdown deadline.
    #[error("Worker pool shutdown exceeded deadline of {0:?}")]
    ShutdownDeadline(std::time::Duration),

    /// Invalid job system configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Handler registration rejected.
    #[error("Handler registration failed: {0}")]
    Registration(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    /// Returns true for persistence failures during claim or finalize.
    ///
    /// These leave the record in a reserved or partially updated state until
    /// the lease window expires.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            JobError::Reservation { .. } | JobError::Completion { .. } | JobError::Store(_)
        )
    }

    /// Returns true for per-job errors raised by the pool rather than the job.
    pub fn is_pool_capacity(&self) -> bool {
        matches!(
            self,
            JobError::PoolShutdown | JobError::EnqueueTimeout { .. } | JobError::ResultTimeout(_)
        )
    }
}

impl From<JobError> for beacon_core::BeaconError {
    fn from(err: JobError) -> Self {
        use beacon_core::BeaconError;
        match err {
            JobError::Registration(msg) => BeaconError::Conflict(msg),
            JobError::Configuration(msg) => BeaconError::Configuration(msg),
            JobError::InvalidRecord(msg) | JobError::InvalidPayload(msg) => {
                BeaconError::Validation(msg)
            }
            JobError::Store(e) => BeaconError::Database(e.to_string()),
            e @ (JobError::ShutdownDeadline(_) | JobError::ResultTimeout(_)) => {
                BeaconError::Timeout(e.to_string())
            }
            other => BeaconError::Internal(other.to_string()),
        }
    }
}
