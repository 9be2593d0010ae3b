//! Typed payloads and the typed handler adapter.

use crate::error::{JobError, JobResult};
use crate::job::{JobContext, JobData, JobHandler};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Job type for email delivery.
pub const JOB_TYPE_EMAIL: &str = "email";

/// Job type for data processing.
pub const JOB_TYPE_DATA_PROCESSING: &str = "data_processing";

/// Free-form options object.
pub type JobOptions = Map<String, Value>;

/// A payload decoded into the shape registered for its job type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload<D, O = JobOptions> {
    #[serde(rename = "type")]
    pub job_type: String,

    pub data: D,

    #[serde(default)]
    pub options: O,
}

impl<D: Serialize, O: Serialize> JobPayload<D, O> {
    /// Builds a payload for `job_type`.
    pub fn new(job_type: impl Into<String>, data: D, options: O) -> Self {
        Self {
            job_type: job_type.into(),
            data,
            options,
        }
    }

    /// Serializes the payload into the JSON stored on the record.
    pub fn to_json(&self) -> JobResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// A handler whose payload is decoded before it runs.
///
/// Wrap implementations in [`Typed`] to register them.
#[async_trait]
pub trait TypedJobHandler: Send + Sync + 'static {
    /// Job type this handler processes.
    const JOB_TYPE: &'static str;

    /// Shape of the payload's `data` object.
    type Data: DeserializeOwned + Send + Sync;

    /// Shape of the payload's `options` object.
    type Options: DeserializeOwned + Default + Send + Sync;

    /// Runs the job with its decoded payload.
    async fn execute(
        &self,
        ctx: &JobContext,
        payload: JobPayload<Self::Data, Self::Options>,
    ) -> JobResult<()>;
}

/// Adapts a [`TypedJobHandler`] to the registry's [`JobHandler`] surface.
pub struct Typed<H>(pub H);

impl<H> fmt::Debug for Typed<H>
where
    H: TypedJobHandler,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Typed").field(&H::JOB_TYPE).finish()
    }
}

#[async_trait]
impl<H: TypedJobHandler> JobHandler for Typed<H> {
    fn job_type(&self) -> &str {
        H::JOB_TYPE
    }

    async fn handle(&self, ctx: &JobContext, job: &JobData) -> JobResult<()> {
        let payload: JobPayload<H::Data, H::Options> = job.decode()?;
        if payload.job_type != H::JOB_TYPE {
            return Err(JobError::InvalidPayload(format!(
                "invalid job type: expected {}, got {}",
                H::JOB_TYPE,
                payload.job_type
            )));
        }
        self.0.execute(ctx, payload).await
    }
}

/// `data` for an email job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailJobData {
    pub to: String,
    pub subject: String,

    /// Template name; rendering happens in the mailer.
    pub template: String,

    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl EmailJobData {
    pub fn validate(&self) -> JobResult<()> {
        if self.to.trim().is_empty() || !self.to.contains('@') {
            return Err(JobError::InvalidPayload(format!(
                "invalid recipient address: '{}'",
                self.to
            )));
        }
        if self.subject.trim().is_empty() {
            return Err(JobError::InvalidPayload("email subject is required".to_string()));
        }
        if self.template.trim().is_empty() {
            return Err(JobError::InvalidPayload("email template is required".to_string()));
        }
        Ok(())
    }
}

/// Supported data processing operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataProcessingOperation {
    Export,
    Import,
    Transform,
    Aggregate,
}

impl fmt::Display for DataProcessingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Export => "export",
            Self::Import => "import",
            Self::Transform => "transform",
            Self::Aggregate => "aggregate",
        };
        f.write_str(name)
    }
}

/// `data` for a data processing job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataProcessingJobData {
    pub operation: DataProcessingOperation,
    pub source: String,

    #[serde(default)]
    pub target: String,

    #[serde(default)]
    pub filters: Map<String, Value>,

    #[serde(default)]
    pub options: Map<String, Value>,
}

impl DataProcessingJobData {
    pub fn validate(&self) -> JobResult<()> {
        if self.source.trim().is_empty() {
            return Err(JobError::InvalidPayload(
                "data processing source is required".to_string(),
            ));
        }
        if matches!(
            self.operation,
            DataProcessingOperation::Export | DataProcessingOperation::Transform
        ) && self.target.trim().is_empty()
        {
            return Err(JobError::InvalidPayload(format!(
                "data processing target is required for {}",
                self.operation
            )));
        }
        Ok(())
    }

    /// `options.user_id`, empty when the enqueuer did not record one.
    pub fn requested_by(&self) -> &str {
        self.options
            .get("user_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }
}
