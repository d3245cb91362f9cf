use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use vigil_core::ids::TaskId;
use vigil_core::records::ReminderSent;
use vigil_core::{DedupKey, HistoryEvent, TaskSnapshot};
use vigil_store::{HistoryStore, MarkerStore, StoreError};

use crate::engine::PolicyEngine;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ReminderStatus {
    /// Marker written by this evaluation; the reminder should be delivered.
    Sent,
    /// Marker already present for this window.
    Duplicate,
    Ineligible(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReminderOutcome {
    pub task_id: TaskId,
    pub dedup_key: Option<DedupKey>,
    pub status: ReminderStatus,
}

/// Evaluates reminder eligibility and claims dedup markers.
///
/// Re-running on unchanged state is idempotent: the marker insert is the
/// single point that decides whether a reminder fires. A claim is released
/// again when its `reminder_sent` record cannot be appended.
pub struct ReminderGate {
    engine: PolicyEngine,
    markers: Arc<dyn MarkerStore>,
    history: Arc<dyn HistoryStore>,
}

impl ReminderGate {
    pub fn new(engine: PolicyEngine, markers: Arc<dyn MarkerStore>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            engine,
            markers,
            history,
        }
    }

    pub fn evaluate(&self, tasks: &[TaskSnapshot], now: DateTime<Utc>) -> Result<Vec<ReminderOutcome>, StoreError> {
        let mut outcomes = Vec::with_capacity(tasks.len());
        for task in tasks {
            let decision = self.engine.evaluate(task, now);
            let reminder = decision.reminder;
            let (true, Some(condition), Some(key)) = (reminder.eligible, reminder.condition, reminder.dedup_key.clone())
            else {
                debug!(task_id = %task.task_id, reason = %reminder.reason, "reminder not eligible");
                outcomes.push(ReminderOutcome {
                    task_id: task.task_id.clone(),
                    dedup_key: reminder.dedup_key,
                    status: ReminderStatus::Ineligible(reminder.reason),
                });
                continue;
            };

            let status = if self.markers.try_mark(&key, &task.task_id, now)? {
                let sent = ReminderSent {
                    task_id: task.task_id.clone(),
                    dedup_key: key.clone(),
                    condition,
                    at: now,
                };
                if let Err(e) = self.history.append(HistoryEvent::ReminderSent(sent)) {
                    // Unrecorded reminders are not sent; free the window for a retry.
                    if let Err(release) = self.markers.unmark(&key) {
                        warn!(dedup_key = %key, error = %release, "marker release failed, window stays claimed");
                    }
                    return Err(e);
                }
                info!(task_id = %task.task_id, dedup_key = %key, %condition, "reminder marked");
                ReminderStatus::Sent
            } else {
                info!(task_id = %task.task_id, dedup_key = %key, "duplicate reminder suppressed");
                ReminderStatus::Duplicate
            };
            outcomes.push(ReminderOutcome {
                task_id: task.task_id.clone(),
                dedup_key: Some(key),
                status,
            });
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use vigil_core::{HistoryKind, TaskPriority, TaskStatus};
    use vigil_settings::PolicySettings;
    use vigil_store::{HistoryQuery, MemoryHistory, MemoryMarkers};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn gate() -> (ReminderGate, Arc<MemoryMarkers>, Arc<MemoryHistory>) {
        let markers = Arc::new(MemoryMarkers::new());
        let history = Arc::new(MemoryHistory::new());
        let gate = ReminderGate::new(
            PolicyEngine::new(PolicySettings::default()),
            markers.clone(),
            history.clone(),
        );
        (gate, markers, history)
    }

    fn due_soon(id: &str) -> TaskSnapshot {
        TaskSnapshot::new(id, TaskStatus::Open)
            .with_priority(TaskPriority::P1)
            .with_due_at("2026-03-02T11:00:00Z")
    }

    #[test]
    fn first_evaluation_sends_then_suppresses() {
        let (gate, markers, history) = gate();
        let tasks = vec![due_soon("T1")];

        let first = gate.evaluate(&tasks, now()).unwrap();
        assert_eq!(first[0].status, ReminderStatus::Sent);
        let second = gate.evaluate(&tasks, now() + chrono::Duration::minutes(5)).unwrap();
        assert_eq!(second[0].status, ReminderStatus::Duplicate);

        assert_eq!(markers.len(), 1);
        let sent = history.query(&HistoryQuery::kind(HistoryKind::ReminderSent)).unwrap();
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn moving_the_due_date_opens_a_new_window() {
        let (gate, markers, _) = gate();
        gate.evaluate(&[due_soon("T1")], now()).unwrap();
        let moved = due_soon("T1").with_due_at("2026-03-02T15:00:00Z");
        let out = gate.evaluate(&[moved], now()).unwrap();
        assert_eq!(out[0].status, ReminderStatus::Sent);
        assert_eq!(markers.len(), 2);
    }

    #[test]
    fn ineligible_tasks_write_nothing() {
        let (gate, markers, history) = gate();
        let out = gate
            .evaluate(&[TaskSnapshot::new("T1", TaskStatus::Open)], now())
            .unwrap();
        assert_eq!(out[0].status, ReminderStatus::Ineligible("no due date".into()));
        assert!(markers.is_empty());
        assert!(history.is_empty());
    }

    #[test]
    fn history_failure_releases_the_marker_for_retry() {
        let (gate, markers, history) = gate();
        history.fail_appends("disk full");
        assert!(gate.evaluate(&[due_soon("T1")], now()).is_err());
        assert!(markers.is_empty());

        history.heal();
        let retry = gate.evaluate(&[due_soon("T1")], now()).unwrap();
        assert_eq!(retry[0].status, ReminderStatus::Sent);
        assert_eq!(markers.len(), 1);
        let sent = history.query(&HistoryQuery::kind(HistoryKind::ReminderSent)).unwrap();
        assert_eq!(sent.len(), 1);
    }

    proptest! {
        #[test]
        fn reruns_emit_at_most_one_marker_per_key(runs in 1usize..8, minutes in proptest::collection::vec(0i64..=120, 1..8)) {
            let (gate, markers, history) = gate();
            let tasks = vec![
                due_soon("T1"),
                TaskSnapshot::new("T2", TaskStatus::InProgress).with_due_at("2026-03-01T00:00:00Z"),
                TaskSnapshot::new("T3", TaskStatus::Open),
            ];
            for _ in 0..runs {
                for m in &minutes {
                    gate.evaluate(&tasks, now() + chrono::Duration::minutes(*m)).unwrap();
                }
            }
            // Until T1's due instant both keys are stable.
            prop_assert_eq!(markers.len(), 2);
            let sent = history.query(&HistoryQuery::kind(HistoryKind::ReminderSent)).unwrap();
            prop_assert_eq!(sent.len(), 2);
        }
    }
}
