//! Export output: rendered files kept per job, and the sources they are read from.
//!
//! An export job reads rows from an [`ExportSource`], renders them in the
//! format named by the payload target and stores the result through an
//! [`ExportFileStore`]. The stored entry is also what marks an export job as
//! completed once its queue record is gone.

use crate::error::{JobError, JobResult};
use crate::store::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Days, Utc};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Collection name for export output.
pub const EXPORT_FILES_COLLECTION: &str = "export_files";

/// Days an export file stays downloadable when not configured.
pub const DEFAULT_EXPORT_EXPIRATION_DAYS: u32 = 30;

/// Upper bound accepted for the configured expiration.
pub const MAX_EXPORT_EXPIRATION_DAYS: u32 = 36_500;

/// A flat row read from an export source.
pub type ExportRow = Map<String, Value>;

/// Output encoding of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// Accepts a bare format (`csv`) or a file name (`users.csv`).
    pub fn from_target(target: &str) -> JobResult<Self> {
        let target = target.trim().to_ascii_lowercase();
        let extension = target.rsplit('.').next().unwrap_or_default();
        match extension {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(JobError::InvalidPayload(format!(
                "unsupported export target: {target}"
            ))),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }

    /// Renders `rows` into file content.
    pub fn render(self, rows: &[ExportRow]) -> JobResult<Vec<u8>> {
        match self {
            Self::Csv => Ok(render_csv(rows).into_bytes()),
            Self::Json => Ok(serde_json::to_vec_pretty(rows)?),
        }
    }
}

/// Header is the union of row keys in first-seen order.
fn render_csv(rows: &[ExportRow]) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for key in rows.iter().flat_map(|row| row.keys()) {
        if !columns.contains(&key.as_str()) {
            columns.push(key);
        }
    }

    let mut out = String::new();
    push_csv_line(&mut out, columns.iter().map(|c| (*c).to_string()));
    for row in rows {
        push_csv_line(
            &mut out,
            columns.iter().map(|column| match row.get(*column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            }),
        );
    }
    out
}

fn push_csv_line(out: &mut String, cells: impl Iterator<Item = String>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&cell);
        }
    }
    out.push('\n');
}

/// `now` plus `days`, clamped to the latest representable instant.
pub fn expiration_from(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now.checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// A stored export result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportFile {
    pub id: String,

    /// Queue record that produced the file.
    pub job_id: String,

    /// Requesting user, empty when unknown.
    pub user_id: String,

    pub file_name: String,
    pub content: Vec<u8>,
    pub record_count: u64,
    pub expires_at: DateTime<Utc>,
    pub created: DateTime<Utc>,
}

impl ExportFile {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Fields supplied when saving an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewExportFile {
    pub job_id: String,
    pub user_id: String,
    pub file_name: String,
    pub content: Vec<u8>,
    pub record_count: u64,
    pub expires_at: DateTime<Utc>,
}

impl NewExportFile {
    /// Creates an entry expiring after [`DEFAULT_EXPORT_EXPIRATION_DAYS`].
    pub fn new(
        job_id: impl Into<String>,
        file_name: impl Into<String>,
        content: Vec<u8>,
        record_count: u64,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            user_id: String::new(),
            file_name: file_name.into(),
            content,
            record_count,
            expires_at: expiration_from(Utc::now(), DEFAULT_EXPORT_EXPIRATION_DAYS),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    #[must_use]
    pub fn expires_in_days(mut self, days: u32) -> Self {
        self.expires_at = expiration_from(Utc::now(), days);
        self
    }

    /// Builds the stored form.
    pub fn into_file(self, id: String, now: DateTime<Utc>) -> ExportFile {
        ExportFile {
            id,
            job_id: self.job_id,
            user_id: self.user_id,
            file_name: self.file_name,
            content: self.content,
            record_count: self.record_count,
            expires_at: self.expires_at,
            created: now,
        }
    }
}

/// Persistence for export output.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExportFileStore: Send + Sync {
    /// Stores a new export file.
    async fn create(&self, file: NewExportFile) -> StoreResult<ExportFile>;

    /// Latest export produced by `job_id`.
    async fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<ExportFile>>;
}

/// Rows that an export job can read.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExportSource: Send + Sync {
    /// Rows of `source` whose fields equal every entry in `filters`.
    ///
    /// Returns [`StoreError::NotFound`] for an unknown source.
    async fn fetch(&self, source: &str, filters: &ExportRow) -> StoreResult<Vec<ExportRow>>;
}

/// In-memory export file store.
#[derive(Debug, Default)]
pub struct MemoryExportFileStore {
    files: RwLock<Vec<ExportFile>>,
}

impl MemoryExportFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl ExportFileStore for MemoryExportFileStore {
    async fn create(&self, file: NewExportFile) -> StoreResult<ExportFile> {
        let file = file.into_file(Uuid::new_v4().to_string(), Utc::now());
        self.files.write().push(file.clone());
        Ok(file)
    }

    async fn find_by_job_id(&self, job_id: &str) -> StoreResult<Option<ExportFile>> {
        // max_by_key keeps the last of equal keys, so later pushes win ties
        Ok(self
            .files
            .read()
            .iter()
            .filter(|file| file.job_id == job_id)
            .max_by_key(|file| file.created)
            .cloned())
    }
}

/// Named in-memory datasets.
#[derive(Debug, Default)]
pub struct MemoryExportSource {
    sources: RwLock<HashMap<String, Vec<ExportRow>>>,
}

impl MemoryExportSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the rows of `source`.
    pub fn insert(&self, source: impl Into<String>, rows: Vec<ExportRow>) {
        self.sources.write().insert(source.into(), rows);
    }
}

#[async_trait]
impl ExportSource for MemoryExportSource {
    async fn fetch(&self, source: &str, filters: &ExportRow) -> StoreResult<Vec<ExportRow>> {
        let sources = self.sources.read();
        let rows = sources
            .get(source)
            .ok_or_else(|| StoreError::NotFound(source.to_string()))?;

        Ok(rows
            .iter()
            .filter(|row| {
                filters
                    .iter()
                    .all(|(key, expected)| row.get(key).unwrap_or(&Value::Null) == expected)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: Value) -> ExportRow {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn test_format_from_target() {
        assert_eq!(ExportFormat::from_target("csv").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_target("Users.CSV").unwrap(), ExportFormat::Csv);
        assert_eq!(ExportFormat::from_target("out.json").unwrap(), ExportFormat::Json);

        let err = ExportFormat::from_target("report.pdf").unwrap_err();
        assert!(matches!(err, JobError::InvalidPayload(_)));
    }

    #[test]
    fn test_csv_quotes_and_missing_fields() {
        let rows = vec![
            row(json!({"name": "Ann", "note": "says \"hi\", twice"})),
            row(json!({"name": "Bob", "age": 41})),
        ];

        let csv = String::from_utf8(ExportFormat::Csv.render(&rows).unwrap()).unwrap();
        assert_eq!(
            csv,
            "name,note,age\nAnn,\"says \"\"hi\"\", twice\",\nBob,,41\n"
        );
    }

    #[test]
    fn test_json_render_keeps_rows() {
        let rows = vec![row(json!({"id": 1})), row(json!({"id": 2}))];
        let bytes = ExportFormat::Json.render(&rows).unwrap();
        let parsed: Vec<ExportRow> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_expiration_adds_days_and_clamps() {
        let now = Utc.with_ymd_and_hms(2024, 1, 30, 8, 0, 0).unwrap();
        assert_eq!(
            expiration_from(now, 30),
            Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap()
        );
        assert_eq!(expiration_from(DateTime::<Utc>::MAX_UTC, 1), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_new_export_file_defaults() {
        let before = Utc::now();
        let file = NewExportFile::new("job-1", "users.csv", b"a\n".to_vec(), 1).with_user("u-9");

        assert_eq!(file.user_id, "u-9");
        assert!(file.expires_at >= expiration_from(before, DEFAULT_EXPORT_EXPIRATION_DAYS));

        let stored = file.expires_in_days(0).into_file("f-1".to_string(), Utc::now());
        assert!(stored.is_expired(Utc::now()));
    }

    #[tokio::test]
    async fn test_memory_file_store_returns_latest_for_job() {
        let store = MemoryExportFileStore::new();
        store
            .create(NewExportFile::new("job-1", "a.csv", Vec::new(), 0))
            .await
            .unwrap();
        let latest = store
            .create(NewExportFile::new("job-1", "b.csv", Vec::new(), 0))
            .await
            .unwrap();
        store
            .create(NewExportFile::new("job-2", "c.csv", Vec::new(), 0))
            .await
            .unwrap();

        let found = store.find_by_job_id("job-1").await.unwrap().unwrap();
        assert_eq!(found.id, latest.id);
        assert!(store.find_by_job_id("job-3").await.unwrap().is_none());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_source_filters_rows() {
        let source = MemoryExportSource::new();
        source.insert(
            "users",
            vec![
                row(json!({"name": "Ann", "active": true})),
                row(json!({"name": "Bob", "active": false})),
            ],
        );

        let rows = source
            .fetch("users", &row(json!({"active": true})))
            .await
            .unwrap();
        assert_eq!(rows, vec![row(json!({"name": "Ann", "active": true}))]);

        let all = source.fetch("users", &ExportRow::new()).await.unwrap();
        assert_eq!(all.len(), 2);

        let err = source.fetch("orders", &ExportRow::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(name) if name == "orders"));
    }
}
