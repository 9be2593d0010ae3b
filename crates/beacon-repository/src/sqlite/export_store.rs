//! SQLite export file store implementation.

use super::record_store::{db_error, format_timestamp, parse_timestamp};
use crate::DatabasePool;
use async_trait::async_trait;
use beacon_jobs::{ExportFile, ExportFileStore, NewExportFile, StoreError, StoreResult};
use chrono::{SubsecRound, Utc};
use sqlx::FromRow;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// SQLite-backed export output.
#[derive(Clone, Debug)]
pub struct SqliteExportFileStore {
    pool: Arc<DatabasePool>,
}

impl SqliteExportFileStore {
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct ExportFileRow {
    id: String,
    job_id: String,
    user_id: String,
    file_name: String,
    content: Vec<u8>,
    record_count: i64,
    expires_at: String,
    created: String,
}

impl TryFrom<ExportFileRow> for ExportFile {
    type Error = StoreError;

    fn try_from(row: ExportFileRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: row.id.clone(),
            reason,
        };

        let record_count = u64::try_from(row.record_count)
            .map_err(|_| corrupt(format!("record_count out of range: {}", row.record_count)))?;
        let expires_at = parse_timestamp(&row.expires_at)
            .map_err(|e| corrupt(format!("invalid expires_at timestamp: {}", e)))?;
        let created = parse_timestamp(&row.created)
            .map_err(|e| corrupt(format!("invalid created timestamp: {}", e)))?;

        Ok(ExportFile {
            id: row.id,
            job_id: row.job_id,
            user_id: row.user_id,
            file_name: row.file_name,
            content: row.content,
            record_count,
            expires_at,
            created,
        })
    }
}

#[async_trait]
impl ExportFileStore for SqliteExportFileStore {
    async fn create(&self, file: NewExportFile) -> StoreResult<ExportFile> {
        let now = Utc::now().trunc_subsecs(6);
        let mut file = file.into_file(Uuid::new_v4().to_string(), now);
        file.expires_at = file.expires_at.trunc_subsecs(6);
        debug!("Creating export file {} for job {}", file.id, file.job_id);

        let record_count = i64::try_from(file.record_count).map_err(|_| StoreError::Corrupt {
            id: file.id.clone(),
            reason: format!("record_count out of range: {}", file.record_count),
        })?;

        sqlx::query(
            r#"
            INSERT INTO export_files (id, job_id, user_id, file_name, content,
                                      record_count, expires_at, created)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.job_id)
        .bind(&file.user_id)
        .bind(&file.file_name)
        .bind(&file.content)
        .bind(record_count)
        .bind(format_timestamp(file.expires_at))
        .bind(format_timestamp(file.created))
        .execute(self.pool.inner())
        .await
        .map_err(db_error)?;

        Ok(file)
    }

    async fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<ExportFile>> {
        debug!("Finding export file for job: {}", job_id);

        let row = sqlx::query_as::<_, ExportFileRow>(
            r#"
            SELECT id, job_id, user_id, file_name, content,
                   record_count, expires_at, created
            FROM export_files
            WHERE job_id = ?
            ORDER BY created DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(self.pool.inner())
        .await
        .map_err(db_error)?;

        row.map(ExportFile::try_from).transpose()
    }
}
