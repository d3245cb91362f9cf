//! Bounded event context around one operator action.

use chrono::{DateTime, Duration, Utc};

use vigil_core::records::{ActionEvent, ContextSummary, FeedbackAction};
use vigil_core::{HistoryEvent, HistoryKind, TaskStatus};
use vigil_settings::{FeedbackSettings, MAX_WINDOW_MINUTES};
use vigil_store::{HistoryQuery, HistoryStore, StoreError};

/// Same-task actions and transitions from `start` to `end`, excluding the
/// action being interpreted.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// End of the follow-up span (`action.at + followup`).
    pub followup_until: DateTime<Utc>,
    /// Events in chronological order.
    pub events: Vec<HistoryEvent>,
}

impl ContextWindow {
    /// Read the window for `action` from history as observed at `now`.
    pub fn collect(
        history: &dyn HistoryStore,
        action: &ActionEvent,
        settings: &FeedbackSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let (start, end, _) = bounds(action, settings, now);
        let rows = history.query(
            &HistoryQuery::kinds(&[HistoryKind::UserAction, HistoryKind::TaskTransitioned])
                .for_task(&action.task_id)
                .between(start, end),
        )?;
        Ok(Self::from_events(action, rows.into_iter().map(|r| r.event), settings, now))
    }

    /// Build the window from an arbitrary event stream. Pure.
    pub fn from_events(
        action: &ActionEvent,
        events: impl IntoIterator<Item = HistoryEvent>,
        settings: &FeedbackSettings,
        now: DateTime<Utc>,
    ) -> Self {
        let (start, end, followup_until) = bounds(action, settings, now);
        let mut events: Vec<HistoryEvent> = events
            .into_iter()
            .filter(|e| e.task_id() == Some(&action.task_id))
            .filter(|e| matches!(e, HistoryEvent::UserAction(_) | HistoryEvent::TaskTransitioned(_)))
            .filter(|e| !matches!(e, HistoryEvent::UserAction(a) if a.id == action.id))
            .filter(|e| (start..=end).contains(&e.occurred_at()))
            .collect();

        // Keep the events nearest the action when over budget.
        if events.len() > settings.max_context_events {
            events.sort_by_key(|e| ((e.occurred_at() - action.at).num_milliseconds().abs(), event_key(e)));
            events.truncate(settings.max_context_events);
        }
        events.sort_by_key(|e| (e.occurred_at(), event_key(e)));

        Self {
            start,
            end,
            followup_until,
            events,
        }
    }

    /// Whether history has been observed through the whole follow-up span.
    pub fn followup_observed(&self) -> bool {
        self.end >= self.followup_until
    }

    /// A completion of the task in `(from, to]`.
    pub fn completed_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        self.events
            .iter()
            .filter(|e| e.occurred_at() > from && e.occurred_at() <= to)
            .any(is_completion)
    }

    /// A completion of the task in `[start, before)`.
    pub fn completed_before(&self, before: DateTime<Utc>) -> bool {
        self.events
            .iter()
            .filter(|e| e.occurred_at() < before)
            .any(is_completion)
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            start: self.start,
            end: self.end,
            followup_observed: self.followup_observed(),
            event_ids: self
                .events
                .iter()
                .filter_map(|e| match e {
                    HistoryEvent::UserAction(a) => Some(a.id.clone()),
                    HistoryEvent::TaskTransitioned(t) => Some(t.id.clone()),
                    _ => None,
                })
                .collect(),
        }
    }
}

fn bounds(action: &ActionEvent, settings: &FeedbackSettings, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>) {
    // Unvalidated settings are clamped so the span arithmetic cannot overflow.
    let span = |minutes: i64| Duration::minutes(minutes.clamp(0, MAX_WINDOW_MINUTES));
    let start = action.at - span(settings.context_lookback_minutes);
    let followup_until = action.at + span(settings.followup_window_minutes);
    let end = followup_until.min(now.max(action.at));
    (start, end, followup_until)
}

fn event_key(e: &HistoryEvent) -> String {
    match e {
        HistoryEvent::UserAction(a) => a.id.to_string(),
        HistoryEvent::TaskTransitioned(t) => t.id.to_string(),
        _ => String::new(),
    }
}

fn is_completion(e: &HistoryEvent) -> bool {
    match e {
        HistoryEvent::UserAction(a) => a.action == FeedbackAction::Complete,
        HistoryEvent::TaskTransitioned(t) => t.to == TaskStatus::Done,
        _ => false,
    }
}
