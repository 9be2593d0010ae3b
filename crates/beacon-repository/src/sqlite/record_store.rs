//! SQLite record store implementation.

use crate::DatabasePool;
use async_trait::async_trait;
use beacon_jobs::record::format_lease;
use beacon_jobs::{
    JobRecord, NewJobRecord, RecordStore, StoreError, StoreResult, QUEUES_COLLECTION,
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// SQLite-backed queue store.
#[derive(Clone, Debug)]
pub struct SqliteRecordStore {
    pool: Arc<DatabasePool>,
}

impl SqliteRecordStore {
    /// Creates a new store over a migrated pool.
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

/// Database row representation of a queue entry.
#[derive(Debug, FromRow)]
struct QueueRow {
    id: String,
    collection: String,
    name: String,
    description: String,
    payload: String,
    attempts: i64,
    reserved_at: String,
    created: String,
    updated: String,
}

impl TryFrom<QueueRow> for JobRecord {
    type Error = StoreError;

    fn try_from(row: QueueRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        let attempts = u32::try_from(row.attempts)
            .map_err(|_| corrupt(format!("attempts out of range: {}", row.attempts)))?;
        let created = parse_timestamp(&row.created)
            .map_err(|e| corrupt(format!("invalid created timestamp: {}", e)))?;
        let updated = parse_timestamp(&row.updated)
            .map_err(|e| corrupt(format!("invalid updated timestamp: {}", e)))?;

        Ok(JobRecord {
            id: row.id,
            collection: row.collection,
            name: row.name,
            description: row.description,
            payload: row.payload,
            attempts,
            reserved_at: row.reserved_at,
            created,
            updated,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc))
}

/// Fixed-width form so text ordering in SQL matches time ordering.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn db_error(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, record: NewJobRecord) -> StoreResult<JobRecord> {
        let now = Utc::now().trunc_subsecs(6);
        let record = record.into_record(Uuid::new_v4().to_string(), now);
        debug!("Creating queue entry: {}", record.id);

        sqlx::query(
            r#"
            INSERT INTO queues (id, collection, name, description, payload,
                                attempts, reserved_at, created, updated)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.collection)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.payload)
        .bind(i64::from(record.attempts))
        .bind(&record.reserved_at)
        .bind(format_timestamp(record.created))
        .bind(format_timestamp(record.updated))
        .execute(self.pool.inner())
        .await
        .map_err(db_error)?;

        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        debug!("Finding queue entry by id: {}", id);

        let row = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, collection, name, description, payload,
                   attempts, reserved_at, created, updated
            FROM queues
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(db_error)?;

        row.map(JobRecord::try_from).transpose()
    }

    async fn save(&self, record: &JobRecord) -> StoreResult<()> {
        debug!(
            "Saving queue entry {} (attempts={}, reserved_at='{}')",
            record.id, record.attempts, record.reserved_at
        );

        let result = sqlx::query(
            r#"
            UPDATE queues
            SET name = ?, description = ?, payload = ?, attempts = ?,
                reserved_at = ?, updated = ?
            WHERE id = ?
            "#,
        )
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.payload)
        .bind(i64::from(record.attempts))
        .bind(&record.reserved_at)
        .bind(format_timestamp(record.updated))
        .bind(&record.id)
        .execute(self.pool.inner())
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, record: &JobRecord) -> StoreResult<()> {
        debug!("Deleting queue entry: {}", record.id);

        let result = sqlx::query("DELETE FROM queues WHERE id = ?")
            .bind(&record.id)
            .execute(self.pool.inner())
            .await
            .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(record.id.clone()));
        }
        Ok(())
    }

    async fn find_available(
        &self,
        expired_before: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<JobRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        // leases share format_lease's fixed width, so text comparison orders by time
        let rows = sqlx::query_as::<_, QueueRow>(
            r#"
            SELECT id, collection, name, description, payload,
                   attempts, reserved_at, created, updated
            FROM queues
            WHERE collection = ? AND (reserved_at = '' OR reserved_at < ?)
            ORDER BY created DESC, id ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(QUEUES_COLLECTION)
        .bind(format_lease(expired_before))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.inner())
        .await
        .map_err(db_error)?;

        debug!("Found {} available queue entries", rows.len());
        rows.into_iter().map(JobRecord::try_from).collect()
    }
}
