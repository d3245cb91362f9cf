//! Table-driven interpretation of operator actions into weak labels.
//!
//! Each rule maps one observed behaviour to three independent targets
//! (usefulness, timing fit, interrupt cost), a confidence and a
//! recommended action. Rules are evaluated in order; the first match wins.
//! Interpretation is a pure function of the action and its context window,
//! so replaying the same event sequence yields identical evidence.

use vigil_core::ids::EvidenceId;
use vigil_core::records::{ActionEvent, FeedbackAction, FeedbackEvidence, RecommendedAction, TargetScores};
use vigil_settings::FeedbackSettings;

use crate::context::ContextWindow;

/// Outcome of a single rule before it is attached to an action.
#[derive(Clone, Debug, PartialEq)]
pub struct Interpretation {
    pub rule: &'static str,
    pub labels: TargetScores,
    pub confidence: f64,
    pub recommended: RecommendedAction,
}

impl Interpretation {
    const fn fixed(
        rule: &'static str,
        labels: TargetScores,
        confidence: f64,
        recommended: RecommendedAction,
    ) -> Self {
        Self {
            rule,
            labels,
            confidence,
            recommended,
        }
    }
}

const fn labels(usefulness: Option<f64>, timing_fit: Option<f64>, interrupt_cost: Option<f64>) -> TargetScores {
    TargetScores {
        usefulness,
        timing_fit,
        interrupt_cost,
    }
}

const DISMISS_THEN_COMPLETED: Interpretation = Interpretation::fixed(
    "dismiss_then_completed",
    labels(Some(0.85), Some(0.65), Some(0.55)),
    0.8,
    RecommendedAction::Keep,
);

const DISMISS_NO_FOLLOWUP: Interpretation = Interpretation::fixed(
    "dismiss_no_followup",
    labels(Some(0.25), Some(0.45), Some(0.35)),
    0.6,
    RecommendedAction::Deprioritize,
);

const SNOOZE_UNKNOWN_DURATION: Interpretation = Interpretation::fixed(
    "snooze_unknown_duration",
    labels(Some(0.7), Some(0.3), None),
    0.4,
    RecommendedAction::Retime,
);

const COMPLETED: Interpretation = Interpretation::fixed(
    "completed",
    labels(Some(0.9), Some(0.75), Some(0.25)),
    0.7,
    RecommendedAction::Keep,
);

const REOPEN_AFTER_COMPLETION: Interpretation = Interpretation::fixed(
    "reopen_after_completion",
    labels(Some(0.6), None, None),
    0.3,
    RecommendedAction::Keep,
);

const INSUFFICIENT_CONTEXT: Interpretation =
    Interpretation::fixed("insufficient_context", TargetScores::INDETERMINATE, 0.0, RecommendedAction::Keep);

const SNOOZE_CONFIDENCE: f64 = 0.6;
const MAX_SNOOZE_INTERRUPT_COST: f64 = 0.95;

#[derive(Clone, Debug)]
pub struct FeedbackInterpreter {
    settings: FeedbackSettings,
}

impl FeedbackInterpreter {
    pub fn new(settings: FeedbackSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    /// Select the matching rule for `action` in `window`.
    pub fn classify(&self, action: &ActionEvent, window: &ContextWindow) -> Interpretation {
        match action.action {
            FeedbackAction::Dismiss => {
                if window.completed_between(action.at, window.followup_until) {
                    DISMISS_THEN_COMPLETED
                } else if window.followup_observed() {
                    DISMISS_NO_FOLLOWUP
                } else {
                    INSUFFICIENT_CONTEXT
                }
            }
            FeedbackAction::Snooze => match action.snooze_minutes {
                Some(minutes) if minutes > 0 => self.snooze(minutes),
                _ => SNOOZE_UNKNOWN_DURATION,
            },
            FeedbackAction::Complete => COMPLETED,
            FeedbackAction::Reopen => {
                if window.completed_before(action.at) {
                    REOPEN_AFTER_COMPLETION
                } else {
                    INSUFFICIENT_CONTEXT
                }
            }
        }
    }

    /// Shorter snoozes mean the reminder was relevant but badly timed.
    fn snooze(&self, minutes: i64) -> Interpretation {
        let short = self.settings.short_snooze_minutes.max(1);
        let is_short = minutes <= short;
        let interrupt_cost =
            (0.5 + 0.3 * short as f64 / minutes.max(1) as f64).clamp(0.0, MAX_SNOOZE_INTERRUPT_COST);
        Interpretation {
            rule: "snooze",
            labels: TargetScores::new(
                if is_short { 0.8 } else { 0.7 },
                if is_short { 0.35 } else { 0.3 },
                interrupt_cost,
            ),
            confidence: SNOOZE_CONFIDENCE,
            recommended: RecommendedAction::Retime,
        }
    }

    pub fn interpret(&self, action: &ActionEvent, window: &ContextWindow) -> FeedbackEvidence {
        let i = self.classify(action, window);
        FeedbackEvidence {
            id: EvidenceId::for_action(&action.id),
            action_event_id: action.id.clone(),
            task_id: action.task_id.clone(),
            action: action.action,
            action_at: action.at,
            labels: i.labels,
            confidence: i.confidence,
            recommended: i.recommended,
            rule: i.rule.to_string(),
            context: window.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use vigil_core::ids::{EventId, TaskId};
    use vigil_core::records::TaskTransition;
    use vigil_core::{HistoryEvent, TaskStatus};

    const MEDIUM: f64 = 0.5;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn interp() -> FeedbackInterpreter {
        FeedbackInterpreter::new(FeedbackSettings::default())
    }

    fn complete_at(minute: i64) -> HistoryEvent {
        HistoryEvent::UserAction(ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Complete, t(minute)))
    }

    fn done_at(minute: i64) -> HistoryEvent {
        HistoryEvent::TaskTransitioned(TaskTransition {
            id: EventId::new(),
            task_id: TaskId::from_raw("T1"),
            from: TaskStatus::InProgress,
            to: TaskStatus::Done,
            at: t(minute),
        })
    }

    fn run(action: &ActionEvent, events: Vec<HistoryEvent>, now: DateTime<Utc>) -> FeedbackEvidence {
        let i = interp();
        let w = ContextWindow::from_events(action, events, i.settings(), now);
        i.interpret(action, &w)
    }

    #[test]
    fn dismiss_then_completion_within_window_is_useful() {
        let action = ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Dismiss, t(0));
        let e = run(&action, vec![done_at(40)], t(90));
        assert_eq!(e.rule, "dismiss_then_completed");
        assert!(e.labels.usefulness.unwrap() >= MEDIUM);
        assert_eq!(e.recommended, RecommendedAction::Keep);
    }

    #[test]
    fn dismiss_completion_after_window_does_not_count() {
        let action = ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Dismiss, t(0));
        let e = run(&action, vec![complete_at(75)], t(120));
        assert_eq!(e.rule, "dismiss_no_followup");
        assert_eq!(e.recommended, RecommendedAction::Deprioritize);
    }

    #[test]
    fn dismiss_with_open_window_is_insufficient() {
        let action = ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Dismiss, t(0));
        let e = run(&action, vec![], t(20));
        assert_eq!(e.rule, "insufficient_context");
        assert!(e.labels.is_indeterminate());
        assert_eq!(e.confidence, 0.0);
    }

    #[test]
    fn short_snooze_has_high_interrupt_cost() {
        for minutes in [1, 5, 10, 15] {
            let action = ActionEvent::snooze(TaskId::from_raw("T1"), minutes, t(0));
            let e = run(&action, vec![], t(0));
            assert_eq!(e.rule, "snooze");
            let cost = e.labels.interrupt_cost.unwrap();
            assert!(cost >= MEDIUM, "{minutes} min snooze gave {cost}");
            assert!(cost <= 0.95);
            assert_eq!(e.labels.usefulness, Some(0.8));
            assert_eq!(e.recommended, RecommendedAction::Retime);
        }
    }

    #[test]
    fn longer_snoozes_cost_less() {
        let short = run(&ActionEvent::snooze(TaskId::from_raw("T1"), 15, t(0)), vec![], t(0));
        let long = run(&ActionEvent::snooze(TaskId::from_raw("T1"), 240, t(0)), vec![], t(0));
        assert!(long.labels.interrupt_cost < short.labels.interrupt_cost);
        assert_eq!(long.labels.usefulness, Some(0.7));
    }

    #[test]
    fn snooze_without_duration() {
        let action = ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Snooze, t(0));
        let e = run(&action, vec![], t(0));
        assert_eq!(e.rule, "snooze_unknown_duration");
        assert_eq!(e.labels.interrupt_cost, None);
    }

    #[test]
    fn reopen_needs_prior_completion() {
        let action = ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Reopen, t(0));
        assert_eq!(run(&action, vec![done_at(-120)], t(60)).rule, "reopen_after_completion");
        assert_eq!(run(&action, vec![], t(60)).rule, "insufficient_context");
    }

    #[test]
    fn interpretation_is_replayable() {
        let action = ActionEvent::new(TaskId::from_raw("T1"), FeedbackAction::Dismiss, t(0));
        let events = vec![done_at(-300), complete_at(30)];
        let a = run(&action, events.clone(), t(100));
        let b = run(&action, events, t(500));
        assert_eq!(a, b);
        assert_eq!(a.id, EvidenceId::for_action(&action.id));
    }
}
