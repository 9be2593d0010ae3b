//! Database connection pool management.

use beacon_config::DatabaseConfig;
use beacon_core::{BeaconError, BeaconResult};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;
use tracing::{info, warn};

/// Database pool wrapper.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Creates a new database pool from configuration.
    ///
    /// An in-memory SQLite URL is pinned to a single connection that never
    /// idles out, since every connection would otherwise see its own database.
    pub async fn new(config: &DatabaseConfig) -> BeaconResult<Self> {
        info!("Connecting to SQLite database...");

        let in_memory = config.url.contains(":memory:");
        let mut options = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { config.max_connections })
            .acquire_timeout(config.connect_timeout());
        if in_memory {
            options = options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = options.connect(&config.url).await.map_err(|e| {
            warn!("Failed to connect to database: {}", e);
            BeaconError::Database(format!("Failed to connect: {}", e))
        })?;

        info!("SQLite connection pool established");
        Ok(Self { pool })
    }

    /// Returns a reference to the underlying pool.
    #[must_use]
    pub fn inner(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if the database connection is healthy.
    pub async fn health_check(&self) -> BeaconResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| BeaconError::Database(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> BeaconResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| BeaconError::Database(format!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Closes the database pool.
    pub async fn close(&self) {
        info!("Closing database connection pool...");
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

impl std::fmt::Debug for DatabasePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabasePool")
            .field("size", &self.pool.size())
            .field("num_idle", &self.pool.num_idle())
            .finish()
    }
}

/// Connects, runs migrations and returns a shared pool.
pub async fn create_pool(config: &DatabaseConfig) -> BeaconResult<Arc<DatabasePool>> {
    let pool = DatabasePool::new(config).await?;
    pool.run_migrations().await?;
    Ok(Arc::new(pool))
}
