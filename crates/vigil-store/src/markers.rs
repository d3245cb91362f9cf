use chrono::{DateTime, Utc};
use tracing::instrument;

use vigil_core::ids::TaskId;
use vigil_core::DedupKey;

use crate::database::Database;
use crate::error::StoreError;
use crate::history::fmt_time;

/// Durable "already notified" set keyed by dedup key.
pub trait MarkerStore: Send + Sync {
    /// Atomically insert the marker. Returns `false` if it already existed.
    fn try_mark(&self, key: &DedupKey, task_id: &TaskId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Release a claim whose reminder could not be recorded, so a later
    /// evaluation can claim it again.
    fn unmark(&self, key: &DedupKey) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct SqliteMarkers {
    db: Database,
}

impl SqliteMarkers {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl MarkerStore for SqliteMarkers {
    #[instrument(skip(self, task_id, at), fields(dedup_key = %key))]
    fn try_mark(&self, key: &DedupKey, task_id: &TaskId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO reminder_markers (dedup_key, task_id, marked_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![key.as_str(), task_id.as_str(), fmt_time(at)],
            )?;
            Ok(inserted == 1)
        })
    }

    #[instrument(skip(self), fields(dedup_key = %key))]
    fn unmark(&self, key: &DedupKey) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM reminder_markers WHERE dedup_key = ?1", [key.as_str()])?;
            Ok(())
        })
    }
}
