//! Built-in job handlers.

use async_trait::async_trait;
use beacon_jobs::{
    DataProcessingJobData, DataProcessingOperation, EmailJobData, ExportFileStore, ExportFormat,
    ExportSource, JobContext, JobOptions, JobPayload, JobResult, NewExportFile, TypedJobHandler,
    DEFAULT_EXPORT_EXPIRATION_DAYS, JOB_TYPE_DATA_PROCESSING, JOB_TYPE_EMAIL,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Sender used when `SMTP_FROM_EMAIL` is not set.
pub const DEFAULT_SENDER: &str = "noreply@beacon.local";

/// Delivers rendered email.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends one message.
    async fn send(&self, from: &str, message: &EmailJobData) -> JobResult<()>;
}

/// Mailer that only logs the message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, from: &str, message: &EmailJobData) -> JobResult<()> {
        info!(
            from,
            to = %message.to,
            subject = %message.subject,
            template = %message.template,
            variables = message.variables.len(),
            "Email sent"
        );
        Ok(())
    }
}

/// Handles `email` jobs.
pub struct SendEmail {
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl SendEmail {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
        }
    }

    /// Sender from `SMTP_FROM_EMAIL`, falling back to [`DEFAULT_SENDER`].
    pub fn from_env(mailer: Arc<dyn Mailer>) -> Self {
        let from = std::env::var("SMTP_FROM_EMAIL")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SENDER.to_string());
        Self::new(mailer, from)
    }
}

#[async_trait]
impl TypedJobHandler for SendEmail {
    const JOB_TYPE: &'static str = JOB_TYPE_EMAIL;
    type Data = EmailJobData;
    type Options = JobOptions;

    async fn execute(&self, ctx: &JobContext, payload: JobPayload<EmailJobData>) -> JobResult<()> {
        ctx.log_start(&format!("Processing email job: {}", ctx.correlation_id));

        payload.data.validate()?;
        self.mailer.send(&self.from, &payload.data).await?;

        ctx.log_end("Email job processed successfully");
        Ok(())
    }
}

/// Handles `data_processing` jobs.
///
/// Exports read `source` from the export source, render it in the `target`
/// format and store the result as the job's export file.
pub struct ProcessData {
    source: Arc<dyn ExportSource>,
    exports: Arc<dyn ExportFileStore>,
    expiration_days: u32,
}

impl ProcessData {
    pub fn new(source: Arc<dyn ExportSource>, exports: Arc<dyn ExportFileStore>) -> Self {
        Self {
            source,
            exports,
            expiration_days: DEFAULT_EXPORT_EXPIRATION_DAYS,
        }
    }

    #[must_use]
    pub fn expires_in_days(mut self, days: u32) -> Self {
        self.expiration_days = days;
        self
    }

    async fn export(&self, ctx: &JobContext, data: &DataProcessingJobData) -> JobResult<()> {
        let format = ExportFormat::from_target(&data.target)?;
        let rows = self.source.fetch(&data.source, &data.filters).await?;
        let content = format.render(&rows)?;

        let file_name = format!(
            "{}_{}.{}",
            data.source,
            ctx.correlation_id,
            format.extension()
        );
        let record_count = u64::try_from(rows.len()).unwrap_or(u64::MAX);

        let file = self
            .exports
            .create(
                NewExportFile::new(&ctx.correlation_id, file_name, content, record_count)
                    .with_user(data.requested_by())
                    .expires_in_days(self.expiration_days),
            )
            .await?;

        info!(
            correlation_id = %ctx.correlation_id,
            export_id = %file.id,
            file_name = %file.file_name,
            record_count,
            bytes = file.content.len(),
            expires_at = %file.expires_at,
            "Export file saved"
        );
        Ok(())
    }
}

#[async_trait]
impl TypedJobHandler for ProcessData {
    const JOB_TYPE: &'static str = JOB_TYPE_DATA_PROCESSING;
    type Data = DataProcessingJobData;
    type Options = JobOptions;

    async fn execute(
        &self,
        ctx: &JobContext,
        payload: JobPayload<DataProcessingJobData>,
    ) -> JobResult<()> {
        let data = payload.data;
        ctx.log_start(&format!(
            "Processing data job: {} ({})",
            ctx.correlation_id, data.operation
        ));

        data.validate()?;

        match data.operation {
            DataProcessingOperation::Export => {
                info!(
                    correlation_id = %ctx.correlation_id,
                    source = %data.source,
                    target = %data.target,
                    filters = data.filters.len(),
                    "Exporting records"
                );
                self.export(ctx, &data).await?;
            }
            DataProcessingOperation::Import => {
                info!(correlation_id = %ctx.correlation_id, source = %data.source, "Importing records");
            }
            DataProcessingOperation::Transform => {
                info!(
                    correlation_id = %ctx.correlation_id,
                    source = %data.source,
                    target = %data.target,
                    "Transforming records"
                );
            }
            DataProcessingOperation::Aggregate => {
                if data.filters.is_empty() {
                    warn!(correlation_id = %ctx.correlation_id, "Aggregating without filters");
                }
                info!(correlation_id = %ctx.correlation_id, source = %data.source, "Aggregating records");
            }
        }

        ctx.log_end("Data processing job completed");
        Ok(())
    }
}
