//! Export source reading rows straight from SQLite tables.

use super::record_store::db_error;
use crate::DatabasePool;
use async_trait::async_trait;
use beacon_jobs::{ExportRow, ExportSource, StoreError, StoreResult};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, QueryBuilder, Row, Sqlite};
use std::sync::Arc;
use tracing::debug;

/// Exports any table of the database; the source name is the table name.
#[derive(Clone, Debug)]
pub struct SqliteExportSource {
    pool: Arc<DatabasePool>,
}

impl SqliteExportSource {
    #[must_use]
    pub fn new(pool: Arc<DatabasePool>) -> Self {
        Self { pool }
    }

    async fn table_exists(&self, table: &str) -> StoreResult<bool> {
        let found: Option<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(self.pool.inner())
                .await
                .map_err(db_error)?;
        Ok(found.is_some())
    }
}

/// Table and column names are interpolated, so only plain identifiers pass.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid_name(kind: &str, name: &str) -> StoreError {
    StoreError::Database(format!("invalid export {kind} name: {name:?}"))
}

/// Maps a row by trying integer, real, then text decoding per column.
fn row_to_json(row: &SqliteRow) -> ExportRow {
    let mut out = ExportRow::new();
    for column in row.columns() {
        let index = column.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            v.map(Value::from)
        } else {
            None
        };
        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    out
}

#[async_trait]
impl ExportSource for SqliteExportSource {
    async fn fetch(&self, source: &str, filters: &ExportRow) -> StoreResult<Vec<ExportRow>> {
        if !is_identifier(source) {
            return Err(invalid_name("source", source));
        }
        if !self.table_exists(source).await? {
            return Err(StoreError::NotFound(source.to_string()));
        }

        let mut query = QueryBuilder::<Sqlite>::new(format!("SELECT * FROM \"{source}\""));
        let mut separator = " WHERE ";
        for (column, value) in filters {
            if !is_identifier(column) {
                return Err(invalid_name("filter", column));
            }
            query.push(separator).push(format!("\"{column}\""));
            separator = " AND ";

            match value {
                Value::Null => {
                    query.push(" IS NULL");
                }
                Value::Bool(b) => {
                    query.push(" = ").push_bind(*b);
                }
                Value::Number(n) => match n.as_i64() {
                    Some(i) => {
                        query.push(" = ").push_bind(i);
                    }
                    None => {
                        query.push(" = ").push_bind(n.as_f64().unwrap_or_default());
                    }
                },
                Value::String(s) => {
                    query.push(" = ").push_bind(s.clone());
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(StoreError::Database(format!(
                        "filter on {column} must be a scalar"
                    )));
                }
            }
        }

        let rows = query
            .build()
            .fetch_all(self.pool.inner())
            .await
            .map_err(db_error)?;

        debug!("Read {} rows from export source {}", rows.len(), source);
        Ok(rows.iter().map(row_to_json).collect())
    }
}
