//! Persisted queue entries.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Collection every queue entry belongs to.
pub const QUEUES_COLLECTION: &str = "queues";

/// A persisted unit of work with lease and retry metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    /// Record identifier.
    pub id: String,

    /// Owning collection; always [`QUEUES_COLLECTION`] for queue entries.
    pub collection: String,

    pub name: String,

    pub description: String,

    /// Raw JSON payload with `type`, optional `data` and `options`.
    pub payload: String,

    /// Failed processing attempts.
    pub attempts: u32,

    /// Empty, or the RFC3339 start of an active lease.
    pub reserved_at: String,

    pub created: DateTime<Utc>,

    pub updated: DateTime<Utc>,
}

impl JobRecord {
    /// Returns true if the record is held by a live lease at `now`.
    ///
    /// An unparseable timestamp counts as unreserved so a corrupted lease can
    /// never pin a record forever.
    pub fn is_reserved(&self, window: Duration, now: DateTime<Utc>) -> bool {
        let Some(reserved_at) = self.reserved_at_time() else {
            return false;
        };

        match chrono::Duration::from_std(window) {
            Ok(window) => now.signed_duration_since(reserved_at) < window,
            Err(_) => true,
        }
    }

    /// Parsed lease start, if any.
    pub fn reserved_at_time(&self) -> Option<DateTime<Utc>> {
        if self.reserved_at.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(&self.reserved_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Marks the record as leased from `now`.
    pub fn reserve(&mut self, now: DateTime<Utc>) {
        self.reserved_at = format_lease(now);
        self.updated = now;
    }

    /// Records a failed attempt and makes the record immediately reclaimable.
    pub fn mark_failed(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.reserved_at.clear();
        self.updated = now;
    }
}

/// Formats a lease timestamp the way the store keeps it (second precision, `Z`).
pub fn format_lease(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Fields supplied when creating a queue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJobRecord {
    pub name: String,
    pub description: String,
    pub payload: String,
}

impl NewJobRecord {
    /// Creates a new record request.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            payload: payload.into(),
        }
    }

    /// Materializes the request into an unreserved record with zero attempts.
    pub fn into_record(self, id: String, now: DateTime<Utc>) -> JobRecord {
        JobRecord {
            id,
            collection: QUEUES_COLLECTION.to_string(),
            name: self.name,
            description: self.description,
            payload: self.payload,
            attempts: 0,
            reserved_at: String::new(),
            created: now,
            updated: now,
        }
    }
}
