//! Beacon Jobs - database-backed job queue
//!
//! Queue entries live in a record store. A scanner periodically fetches
//! entries that are unreserved or whose lease expired and hands them to the
//! [`JobProcessor`], which fans them out over a fixed [`WorkerPool`].
//!
//! Every job goes through the same lifecycle:
//!
//! ```text
//!  Unclaimed ──reserve──▶ Reserved ──handler ok──▶ Completed (record deleted)
//!                            │
//!                            └──error / panic──▶ Failed (attempts + 1, lease cleared)
//! ```
//!
//! Leases are soft: a record whose `reserved_at` is older than the
//! reservation timeout may be claimed again, even if the first attempt is
//! still running.
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon_jobs::{JobProcessor, JobsConfig, MemoryRecordStore};
//! use std::sync::Arc;
//!
//! let processor = Arc::new(JobProcessor::new(
//!     Arc::new(MemoryRecordStore::new()),
//!     JobsConfig::default(),
//! ));
//! processor.register_typed(SendEmail::new(mailer))?;
//!
//! processor
//!     .enqueue("welcome", "Welcome mail", &serde_json::json!({
//!         "type": "email",
//!         "data": {"to": "user@example.com", "subject": "Hi", "template": "welcome"}
//!     }))
//!     .await?;
//!
//! let scanner = QueueScanner::new(processor.clone())?;
//! scanner.scan_once().await?;
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod job;
pub mod payload;
pub mod processor;
pub mod record;
pub mod registry;
pub mod scanner;
pub mod store;
pub mod worker;

pub use config::JobsConfig;
pub use error::{JobError, JobResult};
pub use export::{
    ExportFile, ExportFileStore, ExportFormat, ExportRow, ExportSource, MemoryExportFileStore,
    MemoryExportSource, NewExportFile, DEFAULT_EXPORT_EXPIRATION_DAYS, EXPORT_FILES_COLLECTION,
    MAX_EXPORT_EXPIRATION_DAYS,
};
pub use job::{validate_payload, JobContext, JobData, JobHandler};
pub use payload::{
    DataProcessingJobData, DataProcessingOperation, EmailJobData, JobOptions, JobPayload, Typed,
    TypedJobHandler, JOB_TYPE_DATA_PROCESSING, JOB_TYPE_EMAIL,
};
pub use processor::{JobProcessor, JobStatus};
pub use record::{JobRecord, NewJobRecord, QUEUES_COLLECTION};
pub use registry::JobRegistry;
pub use scanner::{QueueScanner, ScanReport};
pub use store::{MemoryRecordStore, RecordStore, StoreError, StoreResult};
pub use worker::{PoolTimeouts, WorkerPool};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::error::{JobError, JobResult};
    pub use crate::job::{JobContext, JobData, JobHandler};
    pub use crate::payload::{JobPayload, TypedJobHandler};
    pub use crate::processor::JobProcessor;
    pub use crate::record::JobRecord;
    pub use crate::store::RecordStore;
    pub use async_trait::async_trait;
}
