//! Record store seam and the in-memory implementation.

use crate::record::{JobRecord, NewJobRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Backend failure.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored row could not be mapped to a record.
    #[error("Corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<StoreError> for beacon_core::BeaconError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => beacon_core::BeaconError::not_found("JobRecord", id),
            other => beacon_core::BeaconError::Database(other.to_string()),
        }
    }
}

/// Persistence for queue entries.
///
/// Each call is a single-record write or a read; `save` is the only atomic
/// boundary the processor relies on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts a new record and returns it with store-assigned fields.
    async fn create(&self, record: NewJobRecord) -> StoreResult<JobRecord>;

    /// Fetches a record by id.
    async fn find_by_id(&self, id: &str) -> StoreResult<Option<JobRecord>>;

    /// Overwrites an existing record.
    async fn save(&self, record: &JobRecord) -> StoreResult<()>;

    /// Removes a record.
    async fn delete(&self, record: &JobRecord) -> StoreResult<()>;

    /// Records with no lease or a lease older than `expired_before`, newest first.
    async fn find_available(
        &self,
        expired_before: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<JobRecord>>;
}

/// Returns true if `record` qualifies for [`RecordStore::find_available`].
pub fn is_available(record: &JobRecord, expired_before: DateTime<Utc>) -> bool {
    if record.reserved_at.is_empty() {
        return true;
    }
    match record.reserved_at_time() {
        Some(at) => at < expired_before,
        None => true,
    }
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, JobRecord>>,
}

impl MemoryRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record verbatim, replacing any record with the same id.
    pub fn insert(&self, record: JobRecord) {
        self.records.write().insert(record.id.clone(), record);
    }

    /// Returns a snapshot of a record.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.records.read().get(id).cloned()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: NewJobRecord) -> StoreResult<JobRecord> {
        let record = record.into_record(Uuid::new_v4().to_string(), Utc::now());
        self.insert(record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: &str) -> StoreResult<Option<JobRecord>> {
        Ok(self.get(id))
    }

    async fn save(&self, record: &JobRecord) -> StoreResult<()> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.clone())),
        }
    }

    async fn delete(&self, record: &JobRecord) -> StoreResult<()> {
        self.records
            .write()
            .remove(&record.id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(record.id.clone()))
    }

    async fn find_available(
        &self,
        expired_before: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<JobRecord>> {
        let mut available: Vec<JobRecord> = self
            .records
            .read()
            .values()
            .filter(|r| is_available(r, expired_before))
            .cloned()
            .collect();

        available.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));

        Ok(available.into_iter().skip(offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::format_lease;

    fn new_record(name: &str) -> NewJobRecord {
        NewJobRecord::new(name, "", r#"{"type":"A"}"#)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryRecordStore::new();
        let created = store.create(new_record("first")).await.unwrap();

        let found = store.find_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(found, created);
        assert!(store.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_missing_record_fails() {
        let store = MemoryRecordStore::new();
        let record = new_record("ghost").into_record("ghost".into(), Utc::now());

        let result = store.save(&record).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryRecordStore::new();
        let created = store.create(new_record("doomed")).await.unwrap();

        store.delete(&created).await.unwrap();
        assert!(store.is_empty());
        assert!(store.delete(&created).await.is_err());
    }

    #[tokio::test]
    async fn test_find_available_filters_live_leases() {
        let store = MemoryRecordStore::new();
        let now = Utc::now();
        let cutoff = now - chrono::Duration::minutes(5);

        let free = store.create(new_record("free")).await.unwrap();

        let mut live = store.create(new_record("live")).await.unwrap();
        live.reserved_at = format_lease(now);
        store.save(&live).await.unwrap();

        let mut stale = store.create(new_record("stale")).await.unwrap();
        stale.reserved_at = format_lease(now - chrono::Duration::minutes(10));
        store.save(&stale).await.unwrap();

        let ids: Vec<String> = store
            .find_available(cutoff, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();

        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&free.id));
        assert!(ids.contains(&stale.id));
        assert!(!ids.contains(&live.id));
    }

    #[tokio::test]
    async fn test_find_available_newest_first_with_paging() {
        let store = MemoryRecordStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store.insert(
                new_record(&format!("job-{i}"))
                    .into_record(format!("r{i}"), base + chrono::Duration::seconds(i)),
            );
        }

        let page = store.find_available(base, 2, 1).await.unwrap();
        let ids: Vec<&str> = page.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r3", "r2"]);
    }
}
