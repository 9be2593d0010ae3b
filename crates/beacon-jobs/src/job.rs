//! Job data, execution context and the handler contract.

use crate::error::{JobError, JobResult};
use crate::record::JobRecord;
use crate::store::RecordStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

/// Parsed projection of a [`JobRecord`], built fresh for each attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct JobData {
    pub id: String,
    pub name: String,
    pub description: String,

    /// Value of the payload's `type` field.
    pub job_type: String,

    /// Decoded payload object.
    pub payload: Map<String, Value>,

    pub attempts: u32,

    /// Lease start, if the record carried a parseable one.
    pub reserved_at: Option<DateTime<Utc>>,

    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

impl JobData {
    /// Decodes and validates the record's payload.
    pub fn from_record(record: &JobRecord) -> JobResult<Self> {
        let value: Value = serde_json::from_str(&record.payload)
            .map_err(|e| JobError::InvalidPayload(format!("payload is not valid JSON: {e}")))?;

        let Value::Object(payload) = value else {
            return Err(JobError::InvalidPayload(
                "job payload must be a JSON object".to_string(),
            ));
        };

        let job_type = validate_payload(&payload)?.to_string();

        Ok(Self {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            job_type,
            payload,
            attempts: record.attempts,
            reserved_at: record.reserved_at_time(),
            created: record.created,
            updated: record.updated,
        })
    }

    /// Deserializes the whole payload into a typed shape.
    pub fn decode<T: DeserializeOwned>(&self) -> JobResult<T> {
        serde_json::from_value(Value::Object(self.payload.clone())).map_err(|e| {
            JobError::InvalidPayload(format!(
                "payload does not match job type '{}': {e}",
                self.job_type
            ))
        })
    }

    /// The `data` object, if present.
    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.payload.get("data").and_then(Value::as_object)
    }

    /// The `options` object, if present.
    pub fn options(&self) -> Option<&Map<String, Value>> {
        self.payload.get("options").and_then(Value::as_object)
    }
}

/// Checks the payload shape and returns its job type.
///
/// `type` must be a non-empty string; `data` and `options`, when present,
/// must be objects.
pub fn validate_payload(payload: &Map<String, Value>) -> JobResult<&str> {
    let job_type = match payload.get("type") {
        None => {
            return Err(JobError::InvalidPayload(
                "job payload must contain a 'type' field".to_string(),
            ))
        }
        Some(Value::String(t)) if !t.is_empty() => t.as_str(),
        Some(_) => {
            return Err(JobError::InvalidPayload(
                "'type' field must be a non-empty string".to_string(),
            ))
        }
    };

    for field in ["data", "options"] {
        if let Some(value) = payload.get(field) {
            if !value.is_object() {
                return Err(JobError::InvalidPayload(format!(
                    "'{field}' field must be an object"
                )));
            }
        }
    }

    Ok(job_type)
}

/// Context handed to a handler for one execution.
#[derive(Clone)]
pub struct JobContext {
    /// Correlation id; the job id.
    pub correlation_id: String,

    /// Pool worker running the job, `None` on the sequential path.
    pub worker_id: Option<usize>,

    /// Failed attempts before this one.
    pub attempts: u32,

    /// Store the job came from.
    pub store: Arc<dyn RecordStore>,

    started: Instant,
}

impl JobContext {
    /// Creates a context for one execution of `job`.
    pub fn new(job: &JobData, worker_id: Option<usize>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            correlation_id: job.id.clone(),
            worker_id,
            attempts: job.attempts,
            store,
            started: Instant::now(),
        }
    }

    /// Milliseconds since the context was created.
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn log_start(&self, message: &str) {
        info!(
            correlation_id = %self.correlation_id,
            worker_id = ?self.worker_id,
            "{message}"
        );
    }

    pub fn log_end(&self, message: &str) {
        info!(
            correlation_id = %self.correlation_id,
            worker_id = ?self.worker_id,
            elapsed_ms = self.elapsed_ms(),
            "{message}"
        );
    }

    pub fn log_error(&self, err: &dyn fmt::Display, message: &str) {
        error!(
            correlation_id = %self.correlation_id,
            worker_id = ?self.worker_id,
            elapsed_ms = self.elapsed_ms(),
            error = %err,
            "{message}"
        );
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("correlation_id", &self.correlation_id)
            .field("worker_id", &self.worker_id)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Business logic for one job type.
///
/// # Example
///
/// ```rust,ignore
/// struct Ping;
///
/// #[async_trait::async_trait]
/// impl JobHandler for Ping {
///     fn job_type(&self) -> &str {
///         "ping"
///     }
///
///     async fn handle(&self, ctx: &JobContext, _job: &JobData) -> JobResult<()> {
///         ctx.log_end("pong");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> &str;

    /// Runs the job.
    async fn handle(&self, ctx: &JobContext, job: &JobData) -> JobResult<()>;
}
