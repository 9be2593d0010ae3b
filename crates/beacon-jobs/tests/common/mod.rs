//! Shared handlers and fixtures for pool and processor tests.

#![allow(dead_code)]

use async_trait::async_trait;
use beacon_jobs::{
    JobContext, JobData, JobError, JobHandler, JobProcessor, JobRecord, JobResult, JobsConfig,
    MemoryRecordStore, NewJobRecord, RecordStore,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Succeeds immediately.
pub struct Succeed(pub &'static str);

#[async_trait]
impl JobHandler for Succeed {
    fn job_type(&self) -> &str {
        self.0
    }

    async fn handle(&self, _ctx: &JobContext, _job: &JobData) -> JobResult<()> {
        Ok(())
    }
}

/// Always reports an error.
pub struct Fail(pub &'static str);

#[async_trait]
impl JobHandler for Fail {
    fn job_type(&self) -> &str {
        self.0
    }

    async fn handle(&self, _ctx: &JobContext, job: &JobData) -> JobResult<()> {
        Err(JobError::HandlerFailed(format!("{} refused", job.id)))
    }
}

/// Panics inside the handler.
pub struct Explode(pub &'static str);

#[async_trait]
impl JobHandler for Explode {
    fn job_type(&self) -> &str {
        self.0
    }

    async fn handle(&self, _ctx: &JobContext, _job: &JobData) -> JobResult<()> {
        panic!("handler exploded");
    }
}

/// Sleeps, then succeeds.
pub struct Sleep {
    pub job_type: &'static str,
    pub duration: Duration,
}

#[async_trait]
impl JobHandler for Sleep {
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn handle(&self, _ctx: &JobContext, _job: &JobData) -> JobResult<()> {
        tokio::time::sleep(self.duration).await;
        Ok(())
    }
}

/// Counts invocations.
pub struct Count {
    pub job_type: &'static str,
    pub hits: Arc<AtomicUsize>,
}

#[async_trait]
impl JobHandler for Count {
    fn job_type(&self) -> &str {
        self.job_type
    }

    async fn handle(&self, _ctx: &JobContext, _job: &JobData) -> JobResult<()> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config(workers: usize) -> JobsConfig {
    JobsConfig {
        max_workers: workers,
        ..JobsConfig::default()
    }
}

pub fn pooled(store: &Arc<MemoryRecordStore>, config: JobsConfig) -> JobProcessor {
    JobProcessor::new(store.clone(), config)
}

/// Stores a job of `job_type` with an empty data object.
pub async fn queue(store: &MemoryRecordStore, job_type: &str) -> JobRecord {
    queue_payload(store, &json!({"type": job_type, "data": {}}).to_string()).await
}

pub async fn queue_payload(store: &MemoryRecordStore, payload: &str) -> JobRecord {
    store
        .create(NewJobRecord::new("test job", "", payload))
        .await
        .expect("create job record")
}
