use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use vigil_core::ids::EventId;
use vigil_core::records::{ActionEvent, FeedbackEvidence, TaskTransition};
use vigil_core::{HistoryEntry, HistoryEvent, HistoryKind};
use vigil_settings::MAX_WINDOW_MINUTES;
use vigil_store::{HistoryQuery, HistoryStore, StoreError};

use crate::context::ContextWindow;
use crate::interpreter::FeedbackInterpreter;

/// Ingests operator actions and turns closed windows into evidence.
///
/// Evidence only feeds future ranking input and replay; it never touches
/// task state.
pub struct FeedbackRecorder {
    history: Arc<dyn HistoryStore>,
    interpreter: FeedbackInterpreter,
}

impl FeedbackRecorder {
    pub fn new(history: Arc<dyn HistoryStore>, interpreter: FeedbackInterpreter) -> Self {
        Self { history, interpreter }
    }

    pub fn record_action(&self, action: ActionEvent) -> Result<HistoryEntry, StoreError> {
        debug!(task_id = %action.task_id, action = %action.action, "recording action");
        self.history.append(HistoryEvent::UserAction(action))
    }

    pub fn record_transition(&self, transition: TaskTransition) -> Result<HistoryEntry, StoreError> {
        self.history.append(HistoryEvent::TaskTransitioned(transition))
    }

    /// Interpret every action whose follow-up window has closed by `now` and
    /// which has no evidence yet. Returns the evidence appended.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<Vec<FeedbackEvidence>, StoreError> {
        let settings = self.interpreter.settings();
        let closed_before = now - Duration::minutes(settings.followup_window_minutes.clamp(0, MAX_WINDOW_MINUTES));

        let interpreted: HashSet<EventId> = self
            .history
            .query(&HistoryQuery::kind(HistoryKind::FeedbackEvidence))?
            .into_iter()
            .filter_map(|entry| match entry.event {
                HistoryEvent::FeedbackEvidence(e) => Some(e.action_event_id),
                _ => None,
            })
            .collect();

        let pending: Vec<ActionEvent> = self
            .history
            .query(&HistoryQuery::kind(HistoryKind::UserAction).until(closed_before))?
            .into_iter()
            .filter_map(|entry| match entry.event {
                HistoryEvent::UserAction(a) if !interpreted.contains(&a.id) => Some(a),
                _ => None,
            })
            .collect();

        let mut evidence = Vec::with_capacity(pending.len());
        for action in &pending {
            let window = ContextWindow::collect(self.history.as_ref(), action, settings, now)?;
            evidence.push(self.interpreter.interpret(action, &window));
        }
        if evidence.is_empty() {
            return Ok(evidence);
        }

        self.history.append_batch(
            evidence
                .iter()
                .cloned()
                .map(HistoryEvent::FeedbackEvidence)
                .collect(),
        )?;
        info!(count = evidence.len(), "feedback evidence recorded");
        Ok(evidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use vigil_core::ids::TaskId;
    use vigil_core::records::{FeedbackAction, RecommendedAction};
    use vigil_core::TaskStatus;
    use vigil_settings::FeedbackSettings;
    use vigil_store::MemoryHistory;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn recorder() -> (FeedbackRecorder, Arc<MemoryHistory>) {
        let history = Arc::new(MemoryHistory::new());
        let recorder = FeedbackRecorder::new(history.clone(), FeedbackInterpreter::new(FeedbackSettings::default()));
        (recorder, history)
    }

    #[test]
    fn open_windows_are_left_for_later() {
        let (recorder, _) = recorder();
        recorder
            .record_action(ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Dismiss, t(0)))
            .unwrap();
        assert!(recorder.resolve(t(30)).unwrap().is_empty());

        let evidence = recorder.resolve(t(61)).unwrap();
        assert_eq!(evidence.len(), 1);
        assert_eq!(evidence[0].rule, "dismiss_no_followup");
    }

    #[test]
    fn resolve_is_idempotent() {
        let (recorder, history) = recorder();
        recorder
            .record_action(ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Dismiss, t(0)))
            .unwrap();
        recorder
            .record_transition(TaskTransition {
                id: EventId::new(),
                task_id: TaskId::from_raw("T1"),
                from: TaskStatus::Open,
                to: TaskStatus::Done,
                at: t(20),
            })
            .unwrap();

        let first = recorder.resolve(t(120)).unwrap();
        assert_eq!(first[0].recommended, RecommendedAction::Keep);
        assert!(recorder.resolve(t(240)).unwrap().is_empty());

        let stored = history
            .query(&HistoryQuery::kind(HistoryKind::FeedbackEvidence))
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[test]
    fn evidence_does_not_emit_task_transitions() {
        let (recorder, history) = recorder();
        recorder
            .record_action(ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Complete, t(0)))
            .unwrap();
        recorder.resolve(t(120)).unwrap();
        let transitions = history
            .query(&HistoryQuery::kind(HistoryKind::TaskTransitioned))
            .unwrap();
        assert!(transitions.is_empty());
    }
}
