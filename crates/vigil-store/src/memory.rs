//! In-process stores for tests and dry runs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use vigil_core::ids::TaskId;
use vigil_core::{DedupKey, HistoryEntry, HistoryEvent};

use crate::error::StoreError;
use crate::history::{HistoryQuery, HistoryStore};
use crate::markers::MarkerStore;

#[derive(Default)]
pub struct MemoryHistory {
    entries: Mutex<Vec<HistoryEntry>>,
    /// When set, every append fails with this message.
    fail_appends: Mutex<Option<String>>,
}

impl MemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent appends fail, to exercise write-failure paths.
    pub fn fail_appends(&self, reason: impl Into<String>) {
        *self.fail_appends.lock() = Some(reason.into());
    }

    pub fn heal(&self) {
        *self.fail_appends.lock() = None;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn events(&self) -> Vec<HistoryEvent> {
        self.entries.lock().iter().map(|e| e.event.clone()).collect()
    }
}

impl HistoryStore for MemoryHistory {
    fn append(&self, event: HistoryEvent) -> Result<HistoryEntry, StoreError> {
        if let Some(reason) = self.fail_appends.lock().clone() {
            return Err(StoreError::Database(reason));
        }
        let mut entries = self.entries.lock();
        let entry = HistoryEntry {
            sequence: entries.len() as i64 + 1,
            recorded_at: Utc::now(),
            event,
        };
        entries.push(entry.clone());
        Ok(entry)
    }

    fn append_batch(&self, events: Vec<HistoryEvent>) -> Result<Vec<HistoryEntry>, StoreError> {
        if let Some(reason) = self.fail_appends.lock().clone() {
            return Err(StoreError::Database(reason));
        }
        let mut entries = self.entries.lock();
        let recorded_at = Utc::now();
        let mut out = Vec::with_capacity(events.len());
        for event in events {
            let entry = HistoryEntry {
                sequence: entries.len() as i64 + 1,
                recorded_at,
                event,
            };
            entries.push(entry.clone());
            out.push(entry);
        }
        Ok(out)
    }

    fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryEntry>, StoreError> {
        let entries = self.entries.lock();
        let matching = entries.iter().filter(|e| query.matches(&e.event));
        let mut out: Vec<HistoryEntry> = if query.newest_first {
            matching.rev().cloned().collect()
        } else {
            matching.cloned().collect()
        };
        if let Some(limit) = query.limit {
            out.truncate(limit as usize);
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryMarkers {
    keys: Mutex<HashSet<DedupKey>>,
}

impl MemoryMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl MarkerStore for MemoryMarkers {
    fn try_mark(&self, key: &DedupKey, _task_id: &TaskId, _at: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.keys.lock().insert(key.clone()))
    }

    fn unmark(&self, key: &DedupKey) -> Result<(), StoreError> {
        self.keys.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_core::records::{ActionEvent, FeedbackAction};
    use vigil_core::{HistoryKind, ReminderCondition};

    fn event(task: &str, minute: u32) -> HistoryEvent {
        HistoryEvent::UserAction(ActionEvent::new(
            TaskId::from_raw(task),
            FeedbackAction::Snooze,
            Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap(),
        ))
    }

    #[test]
    fn memory_history_filters_like_sqlite() {
        let history = MemoryHistory::new();
        history.append(event("T1", 0)).unwrap();
        history.append(event("T2", 1)).unwrap();
        history.append(event("T1", 2)).unwrap();

        let rows = history
            .query(&HistoryQuery::kind(HistoryKind::UserAction).for_task(&TaskId::from_raw("T1")).newest_first())
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sequence, 3);
    }

    #[test]
    fn failing_appends_leave_history_untouched() {
        let history = MemoryHistory::new();
        history.fail_appends("disk full");
        assert!(history.append(event("T1", 0)).is_err());
        assert!(history.append_batch(vec![event("T1", 1)]).is_err());
        assert!(history.is_empty());
        history.heal();
        assert!(history.append(event("T1", 0)).is_ok());
    }

    #[test]
    fn memory_markers_dedup() {
        let markers = MemoryMarkers::new();
        let task = TaskId::from_raw("T1");
        let key = DedupKey::new(&task, ReminderCondition::DueSoon, "due@5");
        assert!(markers.try_mark(&key, &task, Utc::now()).unwrap());
        assert!(!markers.try_mark(&key, &task, Utc::now()).unwrap());
        assert_eq!(markers.len(), 1);
    }
}
