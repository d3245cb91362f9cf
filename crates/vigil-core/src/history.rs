use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::records::{
    ActionEvent, ConfigAudit, ExperimentApplication, ExperimentRun, FeatureSnapshot,
    FeedbackEvidence, ModelScoreRecord, RankingDecision, ReminderSent, TaskTransition,
};

/// Everything that lands in the append-only history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    FeatureSnapshot(FeatureSnapshot),
    ModelScore(ModelScoreRecord),
    RankingDecision(RankingDecision),
    UserAction(ActionEvent),
    TaskTransitioned(TaskTransition),
    FeedbackEvidence(FeedbackEvidence),
    ReminderSent(ReminderSent),
    ConfigChanged(ConfigAudit),
    ExperimentRun(ExperimentRun),
    ExperimentApplied(ExperimentApplication),
}

impl HistoryEvent {
    pub fn kind(&self) -> HistoryKind {
        match self {
            Self::FeatureSnapshot(_) => HistoryKind::FeatureSnapshot,
            Self::ModelScore(_) => HistoryKind::ModelScore,
            Self::RankingDecision(_) => HistoryKind::RankingDecision,
            Self::UserAction(_) => HistoryKind::UserAction,
            Self::TaskTransitioned(_) => HistoryKind::TaskTransitioned,
            Self::FeedbackEvidence(_) => HistoryKind::FeedbackEvidence,
            Self::ReminderSent(_) => HistoryKind::ReminderSent,
            Self::ConfigChanged(_) => HistoryKind::ConfigChanged,
            Self::ExperimentRun(_) => HistoryKind::ExperimentRun,
            Self::ExperimentApplied(_) => HistoryKind::ExperimentApplied,
        }
    }

    /// Logical time of the event, used for window queries.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::FeatureSnapshot(s) => s.logical_time,
            Self::ModelScore(s) => s.recorded_at,
            Self::RankingDecision(d) => d.decided_at,
            Self::UserAction(a) => a.at,
            Self::TaskTransitioned(t) => t.at,
            Self::FeedbackEvidence(e) => e.action_at,
            Self::ReminderSent(r) => r.at,
            Self::ConfigChanged(c) => c.at,
            Self::ExperimentRun(r) => r.created_at,
            Self::ExperimentApplied(a) => a.at,
        }
    }

    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            Self::FeatureSnapshot(s) => Some(&s.task.task_id),
            Self::ModelScore(s) => Some(&s.task_id),
            Self::RankingDecision(d) => Some(&d.task_id),
            Self::UserAction(a) => Some(&a.task_id),
            Self::TaskTransitioned(t) => Some(&t.task_id),
            Self::FeedbackEvidence(e) => Some(&e.task_id),
            Self::ReminderSent(r) => Some(&r.task_id),
            Self::ConfigChanged(_) | Self::ExperimentRun(_) | Self::ExperimentApplied(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryKind {
    FeatureSnapshot,
    ModelScore,
    RankingDecision,
    UserAction,
    TaskTransitioned,
    FeedbackEvidence,
    ReminderSent,
    ConfigChanged,
    ExperimentRun,
    ExperimentApplied,
}

impl HistoryKind {
    pub const ALL: [HistoryKind; 10] = [
        Self::FeatureSnapshot,
        Self::ModelScore,
        Self::RankingDecision,
        Self::UserAction,
        Self::TaskTransitioned,
        Self::FeedbackEvidence,
        Self::ReminderSent,
        Self::ConfigChanged,
        Self::ExperimentRun,
        Self::ExperimentApplied,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FeatureSnapshot => "feature_snapshot",
            Self::ModelScore => "model_score",
            Self::RankingDecision => "ranking_decision",
            Self::UserAction => "user_action",
            Self::TaskTransitioned => "task_transitioned",
            Self::FeedbackEvidence => "feedback_evidence",
            Self::ReminderSent => "reminder_sent",
            Self::ConfigChanged => "config_changed",
            Self::ExperimentRun => "experiment_run",
            Self::ExperimentApplied => "experiment_applied",
        }
    }
}

impl fmt::Display for HistoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown history kind: {s}"))
    }
}

/// A history event together with its storage position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Monotonic append order.
    pub sequence: i64,
    pub recorded_at: DateTime<Utc>,
    pub event: HistoryEvent,
}
