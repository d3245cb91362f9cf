//! Append-only records written to the shared history.
//!
//! Every type here is create-once. Nothing in this workspace updates or
//! deletes a record after it has been appended.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::bucket::{AttentionView, DedupKey, PriorityBucket, ReminderCondition};
use crate::features::FeatureVector;
use crate::ids::{DecisionId, EventId, EvidenceId, RequestId, RunId, ScoreId, SnapshotId, TaskId};
use crate::mode::{PersonalizationConfig, PersonalizationMode};
use crate::task::{TaskSnapshot, TaskStatus};

// ─────────────────────────────────────────────────────────────────────────────
// Snapshots
// ─────────────────────────────────────────────────────────────────────────────

/// Exact inputs used for one candidate's decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub id: SnapshotId,
    pub request_id: RequestId,
    pub task: TaskSnapshot,
    pub logical_time: DateTime<Utc>,
    /// `None` when extraction failed; see `feature_error`.
    pub features: Option<FeatureVector>,
    pub feature_error: Option<String>,
    /// SHA-256 over the task snapshot and logical time.
    pub digest: String,
}

impl FeatureSnapshot {
    pub fn capture(
        request_id: RequestId,
        task: TaskSnapshot,
        logical_time: DateTime<Utc>,
        features: Result<FeatureVector, String>,
    ) -> Self {
        let digest = Self::compute_digest(&task, logical_time);
        let (features, feature_error) = match features {
            Ok(f) => (Some(f), None),
            Err(e) => (None, Some(e)),
        };
        Self {
            id: SnapshotId::new(),
            request_id,
            task,
            logical_time,
            features,
            feature_error,
            digest,
        }
    }

    pub fn compute_digest(task: &TaskSnapshot, logical_time: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(task).unwrap_or_default());
        hasher.update(logical_time.to_rfc3339().as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// True when the stored inputs still hash to the recorded digest.
    pub fn verify_digest(&self) -> bool {
        Self::compute_digest(&self.task, self.logical_time) == self.digest
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scores
// ─────────────────────────────────────────────────────────────────────────────

/// Per-target weak labels or predictions. `None` is indeterminate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetScores {
    pub usefulness: Option<f64>,
    pub timing_fit: Option<f64>,
    pub interrupt_cost: Option<f64>,
}

impl TargetScores {
    pub const INDETERMINATE: TargetScores = TargetScores {
        usefulness: None,
        timing_fit: None,
        interrupt_cost: None,
    };

    pub fn new(usefulness: f64, timing_fit: f64, interrupt_cost: f64) -> Self {
        Self {
            usefulness: Some(usefulness),
            timing_fit: Some(timing_fit),
            interrupt_cost: Some(interrupt_cost),
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.usefulness.is_none() && self.timing_fit.is_none() && self.interrupt_cost.is_none()
    }

    /// `(name, value)` pairs in a fixed order.
    pub fn targets(&self) -> [(&'static str, Option<f64>); 3] {
        [
            ("usefulness", self.usefulness),
            ("timing_fit", self.timing_fit),
            ("interrupt_cost", self.interrupt_cost),
        ]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored,
    Failed,
    TimedOut,
    Cancelled,
    InvalidOutput,
    /// No features to score.
    Skipped,
}

impl ScoreOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scored => "scored",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::InvalidOutput => "invalid_output",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Scored)
    }
}

impl fmt::Display for ScoreOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learned score for one candidate, written whatever the active mode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelScoreRecord {
    pub id: ScoreId,
    pub request_id: RequestId,
    pub snapshot_id: SnapshotId,
    pub task_id: TaskId,
    pub scorer_version: String,
    pub outcome: ScoreOutcome,
    pub score: Option<f64>,
    /// Zero for every outcome other than `Scored`.
    pub confidence: f64,
    #[serde(default)]
    pub predicted: Option<TargetScores>,
    pub threshold: f64,
    /// Scored and `confidence >= threshold`.
    pub eligible: bool,
    pub mode: PersonalizationMode,
    #[serde(default)]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Decisions
// ─────────────────────────────────────────────────────────────────────────────

/// One additive term of the deterministic urgency score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UrgencyComponent {
    pub label: String,
    pub points: f64,
}

impl UrgencyComponent {
    pub fn new(label: impl Into<String>, points: f64) -> Self {
        Self {
            label: label.into(),
            points,
        }
    }
}

impl fmt::Display for UrgencyComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:+}", self.label, self.points)
    }
}

/// Explanation record for one served (or composed) candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankingDecision {
    pub id: DecisionId,
    pub request_id: RequestId,
    pub snapshot_id: SnapshotId,
    pub task_id: TaskId,
    pub view: AttentionView,
    pub bucket: PriorityBucket,
    pub bucket_rank: u8,
    pub urgency_score: f64,
    /// 1-based position in deterministic order.
    pub deterministic_rank: u32,
    /// 1-based position actually served.
    pub final_rank: u32,
    pub model_score: Option<f64>,
    pub model_confidence: Option<f64>,
    pub scorer_version: Option<String>,
    pub personalization_applied: bool,
    pub mode: PersonalizationMode,
    pub config_version: u64,
    pub threshold: f64,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    /// Within the requested limit.
    pub served: bool,
    pub explanation: String,
    pub decided_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Observed actions and feedback
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Dismiss,
    Snooze,
    Complete,
    Reopen,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dismiss => "dismiss",
            Self::Snooze => "snooze",
            Self::Complete => "complete",
            Self::Reopen => "reopen",
        }
    }
}

impl fmt::Display for FeedbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dismiss" => Ok(Self::Dismiss),
            "snooze" => Ok(Self::Snooze),
            "complete" => Ok(Self::Complete),
            "reopen" => Ok(Self::Reopen),
            other => Err(format!("unknown action: {other}")),
        }
    }
}

/// An operator action reported by the notification or task collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionEvent {
    pub id: EventId,
    pub task_id: TaskId,
    pub action: FeedbackAction,
    #[serde(default)]
    pub snooze_minutes: Option<i64>,
    #[serde(default)]
    pub reminder_key: Option<DedupKey>,
    pub at: DateTime<Utc>,
}

impl ActionEvent {
    pub fn new(task_id: TaskId, action: FeedbackAction, at: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            task_id,
            action,
            snooze_minutes: None,
            reminder_key: None,
            at,
        }
    }

    pub fn snooze(task_id: TaskId, minutes: i64, at: DateTime<Utc>) -> Self {
        Self {
            snooze_minutes: Some(minutes),
            ..Self::new(task_id, FeedbackAction::Snooze, at)
        }
    }
}

/// Lifecycle transition emitted by the task store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskTransition {
    pub id: EventId,
    pub task_id: TaskId,
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Keep,
    Deprioritize,
    Retime,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Deprioritize => "deprioritize",
            Self::Retime => "retime",
        }
    }
}

/// The context an interpretation was computed from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub followup_observed: bool,
    pub event_ids: Vec<EventId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvidence {
    pub id: EvidenceId,
    pub action_event_id: EventId,
    pub task_id: TaskId,
    pub action: FeedbackAction,
    pub action_at: DateTime<Utc>,
    pub labels: TargetScores,
    pub confidence: f64,
    pub recommended: RecommendedAction,
    /// Name of the interpretation rule that fired.
    pub rule: String,
    pub context: ContextSummary,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reminders
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReminderSent {
    pub task_id: TaskId,
    pub dedup_key: DedupKey,
    pub condition: ReminderCondition,
    pub at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Control plane
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlCommand {
    Update,
    Rollback,
}

/// Before/after audit of a personalization config change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConfigAudit {
    pub id: EventId,
    pub command: ControlCommand,
    pub actor: String,
    pub rationale: String,
    pub before: PersonalizationConfig,
    pub after: PersonalizationConfig,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentComparison {
    pub requests: u32,
    pub candidates: u32,
    pub scored_records: u32,
    pub baseline_ordering_shift_rate: f64,
    pub candidate_ordering_shift_rate: f64,
    pub baseline_personalized_rate: f64,
    pub candidate_personalized_rate: f64,
    pub bucket_crossings: u32,
}

/// A candidate configuration replayed against the baseline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRun {
    pub id: RunId,
    pub actor: String,
    pub rationale: String,
    pub baseline: PersonalizationConfig,
    pub candidate_mode: PersonalizationMode,
    pub candidate_threshold: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub comparison: ExperimentComparison,
    /// Empty when every safety gate passed.
    pub blocked_reasons: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ExperimentRun {
    pub fn is_ready(&self) -> bool {
        self.blocked_reasons.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentAction {
    Apply,
    Rollback,
    NoOp,
}

impl ExperimentAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apply => "apply",
            Self::Rollback => "rollback",
            Self::NoOp => "no_op",
        }
    }
}

impl FromStr for ExperimentAction {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "apply" => Ok(Self::Apply),
            "rollback" => Ok(Self::Rollback),
            "no_op" | "noop" => Ok(Self::NoOp),
            other => Err(format!("unknown experiment action: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentApplication {
    pub id: EventId,
    pub run_id: RunId,
    pub action: ExperimentAction,
    pub actor: String,
    pub rationale: String,
    pub applied: bool,
    pub reason: Option<String>,
    pub config_version: Option<u64>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    #[test]
    fn snapshot_digest_is_stable() {
        let task = TaskSnapshot::new("T1", TaskStatus::Open).with_due_at("2026-03-02T11:00:00Z");
        let a = FeatureSnapshot::compute_digest(&task, t0());
        let b = FeatureSnapshot::compute_digest(&task, t0());
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn snapshot_digest_changes_with_inputs() {
        let task = TaskSnapshot::new("T1", TaskStatus::Open);
        let later = t0() + chrono::Duration::minutes(1);
        assert_ne!(
            FeatureSnapshot::compute_digest(&task, t0()),
            FeatureSnapshot::compute_digest(&task, later)
        );
    }

    #[test]
    fn capture_records_feature_error() {
        let task = TaskSnapshot::new("T1", TaskStatus::Open).with_due_at("not a date");
        let snap = FeatureSnapshot::capture(RequestId::new(), task, t0(), Err("bad due_at".into()));
        assert!(snap.features.is_none());
        assert_eq!(snap.feature_error.as_deref(), Some("bad due_at"));
        assert!(snap.verify_digest());
    }

    #[test]
    fn tampered_snapshot_fails_digest() {
        let task = TaskSnapshot::new("T1", TaskStatus::Open);
        let mut snap = FeatureSnapshot::capture(RequestId::new(), task, t0(), Err("x".into()));
        snap.task.status = TaskStatus::Done;
        assert!(!snap.verify_digest());
    }

    #[test]
    fn target_scores_indeterminate() {
        assert!(TargetScores::INDETERMINATE.is_indeterminate());
        assert!(!TargetScores::new(0.1, 0.2, 0.3).is_indeterminate());
    }

    #[test]
    fn urgency_component_display() {
        assert_eq!(UrgencyComponent::new("overdue", 60.0).to_string(), "overdue +60");
        assert_eq!(UrgencyComponent::new("blocked", -15.0).to_string(), "blocked -15");
    }

    #[test]
    fn experiment_action_parse() {
        assert_eq!("no_op".parse::<ExperimentAction>().unwrap(), ExperimentAction::NoOp);
        assert!("ship".parse::<ExperimentAction>().is_err());
    }
}
