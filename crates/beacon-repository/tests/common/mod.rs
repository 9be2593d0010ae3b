//! Common test infrastructure for database integration tests.

#![allow(dead_code)]

use beacon_config::DatabaseConfig;
use beacon_repository::{
    create_pool, DatabasePool, SqliteExportFileStore, SqliteExportSource, SqliteRecordStore,
};
use std::sync::Arc;

/// Test database wrapper.
///
/// Each instance owns a private in-memory SQLite database with the
/// migrations applied.
pub struct TestDatabase {
    pool: Arc<DatabasePool>,
}

impl TestDatabase {
    /// Creates a fresh migrated database.
    pub async fn new() -> Self {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };

        let pool = create_pool(&config)
            .await
            .expect("Failed to create test database");

        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<DatabasePool> {
        Arc::clone(&self.pool)
    }

    /// Returns a store over this database.
    pub fn store(&self) -> Arc<SqliteRecordStore> {
        Arc::new(SqliteRecordStore::new(self.pool()))
    }

    /// Returns an export file store over this database.
    pub fn export_files(&self) -> Arc<SqliteExportFileStore> {
        Arc::new(SqliteExportFileStore::new(self.pool()))
    }

    /// Returns an export source over this database.
    pub fn export_source(&self) -> Arc<SqliteExportSource> {
        Arc::new(SqliteExportSource::new(self.pool()))
    }
}
