//! Job type to handler mapping.
//!
//! Built once at startup and read concurrently by every worker afterwards.
//! Registration is append-only: a type cannot be replaced or removed.

use crate::error::{JobError, JobResult};
use crate::job::JobHandler;
use crate::payload::{Typed, TypedJobHandler};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Thread-safe registry of job handlers.
#[derive(Default)]
pub struct JobRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared job type.
    pub fn register(&self, handler: Arc<dyn JobHandler>) -> JobResult<()> {
        let job_type = handler.job_type().to_string();
        if job_type.is_empty() {
            return Err(JobError::Registration(
                "handler job type cannot be empty".to_string(),
            ));
        }

        let mut handlers = self.handlers.write();
        if handlers.contains_key(&job_type) {
            return Err(JobError::Registration(format!(
                "handler for job type '{job_type}' already registered"
            )));
        }

        handlers.insert(job_type.clone(), handler);
        info!(job_type = %job_type, "Registered job handler");
        Ok(())
    }

    /// Register a typed handler.
    pub fn register_typed<H: TypedJobHandler>(&self, handler: H) -> JobResult<()> {
        self.register(Arc::new(Typed(handler)))
    }

    /// Look up the handler for a job type.
    pub fn get_handler(&self, job_type: &str) -> JobResult<Arc<dyn JobHandler>> {
        self.handlers
            .read()
            .get(job_type)
            .cloned()
            .ok_or_else(|| JobError::NoHandler(job_type.to_string()))
    }

    /// Registered job types, in no particular order.
    pub fn list_handlers(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.list_handlers())
            .finish()
    }
}
