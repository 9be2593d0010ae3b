//! Application assembly and lifecycle.

use crate::handlers::{LogMailer, Mailer, ProcessData, SendEmail};
use beacon_config::{AppConfig, DatabaseConfig};
use beacon_core::{BeaconError, BeaconResult};
use beacon_jobs::{
    ExportFileStore, ExportSource, JobProcessor, MemoryExportFileStore, MemoryExportSource,
    MemoryRecordStore, QueueScanner, RecordStore,
};
use beacon_repository::{
    create_pool, DatabasePool, SqliteExportFileStore, SqliteExportSource, SqliteRecordStore,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Persistence opened for one `database.url`.
pub struct Stores {
    pub records: Arc<dyn RecordStore>,
    pub exports: Arc<dyn ExportFileStore>,
    pub sources: Arc<dyn ExportSource>,

    /// SQLite pool, kept so it can be closed on exit.
    pub pool: Option<Arc<DatabasePool>>,
}

/// Opens the stores selected by `database.url`.
///
/// The in-memory backend has no export sources until rows are inserted.
pub async fn open_stores(config: &DatabaseConfig) -> BeaconResult<Stores> {
    if config.is_memory() {
        warn!("Using in-memory stores; queued jobs and export files are lost on exit");
        return Ok(Stores {
            records: Arc::new(MemoryRecordStore::new()),
            exports: Arc::new(MemoryExportFileStore::new()),
            sources: Arc::new(MemoryExportSource::new()),
            pool: None,
        });
    }

    let pool = create_pool(config).await?;
    Ok(Stores {
        records: Arc::new(SqliteRecordStore::new(pool.clone())),
        exports: Arc::new(SqliteExportFileStore::new(pool.clone())),
        sources: Arc::new(SqliteExportSource::new(pool.clone())),
        pool: Some(pool),
    })
}

/// A fully wired queue worker.
pub struct App {
    config: AppConfig,
    processor: Arc<JobProcessor>,
    scanner: Arc<QueueScanner>,
    db_pool: Option<Arc<DatabasePool>>,
}

impl App {
    /// Builds the application with the logging mailer.
    pub async fn build(config: AppConfig) -> BeaconResult<Self> {
        Self::build_with_mailer(config, Arc::new(LogMailer)).await
    }

    /// Builds the application around `mailer`.
    pub async fn build_with_mailer(
        config: AppConfig,
        mailer: Arc<dyn Mailer>,
    ) -> BeaconResult<Self> {
        let stores = open_stores(&config.database).await?;
        Self::assemble(config, stores, mailer)
    }

    /// Wires handlers, processor and scanner over already opened stores.
    ///
    /// Must be called within a Tokio runtime.
    pub fn assemble(
        config: AppConfig,
        stores: Stores,
        mailer: Arc<dyn Mailer>,
    ) -> BeaconResult<Self> {
        let Stores {
            records,
            exports,
            sources,
            pool: db_pool,
        } = stores;

        let processor = Arc::new(
            JobProcessor::new(records, config.jobs.clone()).with_export_store(exports.clone()),
        );
        processor.register_typed(SendEmail::from_env(mailer))?;
        processor.register_typed(
            ProcessData::new(sources, exports)
                .expires_in_days(config.jobs.export_file_expiration_days),
        )?;

        info!(
            handlers = ?processor.registry().list_handlers(),
            workers = config.jobs.max_workers,
            "Job processor ready"
        );

        let scanner = Arc::new(QueueScanner::new(processor.clone())?);

        Ok(Self {
            config,
            processor,
            scanner,
            db_pool,
        })
    }

    pub fn processor(&self) -> &Arc<JobProcessor> {
        &self.processor
    }

    pub fn scanner(&self) -> &Arc<QueueScanner> {
        &self.scanner
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs the scanner until `signal` resolves, then shuts everything down.
    ///
    /// The scanner is stopped first so no new batch starts, then the pool is
    /// drained within `jobs.shutdown_timeout_secs`.
    pub async fn run_until<F>(self, signal: F) -> BeaconResult<()>
    where
        F: Future<Output = ()>,
    {
        let scanner = self.scanner.clone();
        let scan_task = tokio::spawn(async move { scanner.start().await });

        signal.await;

        self.scanner.stop();
        match scan_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Queue scanner error: {}", e),
            Err(e) => error!("Queue scanner task failed: {}", e),
        }

        let deadline = self.config.jobs.shutdown_timeout();
        info!(deadline_secs = deadline.as_secs(), "Shutting down worker pool...");
        let result = self.processor.shutdown(deadline).await.map_err(BeaconError::from);

        if let Some(pool) = &self.db_pool {
            pool.close().await;
        }

        result
    }
}
