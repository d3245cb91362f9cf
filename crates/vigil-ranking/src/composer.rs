//! Merge deterministic order with bounded learned reordering.
//!
//! The composer is pure: the live service and the replay evaluator both run
//! recorded inputs through [`compose`] and must agree on the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::ids::{DecisionId, RequestId, SnapshotId, TaskId};
use vigil_core::records::{ModelScoreRecord, RankingDecision, ScoreOutcome};
use vigil_core::{AttentionView, PersonalizationConfig, PersonalizationMode, PriorityBucket};
use vigil_policy::{deterministic_cmp, PolicyDecision};

/// Input for one candidate.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub snapshot_id: SnapshotId,
    pub policy: PolicyDecision,
    /// `None` when no score was recorded for the candidate.
    pub score: Option<ModelScoreRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComposedCandidate {
    pub snapshot_id: SnapshotId,
    pub policy: PolicyDecision,
    pub score: Option<ModelScoreRecord>,
    pub deterministic_rank: u32,
    pub final_rank: u32,
    pub personalization_applied: bool,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
    pub explanation: String,
}

impl ComposedCandidate {
    pub fn task_id(&self) -> &TaskId {
        &self.policy.task_id
    }

    pub fn bucket(&self) -> PriorityBucket {
        self.policy.bucket
    }

    pub fn to_decision(
        &self,
        request_id: &RequestId,
        view: AttentionView,
        config: &PersonalizationConfig,
        served: bool,
        decided_at: DateTime<Utc>,
    ) -> RankingDecision {
        let scored = self.score.as_ref().filter(|s| s.outcome == ScoreOutcome::Scored);
        RankingDecision {
            id: DecisionId::new(),
            request_id: request_id.clone(),
            snapshot_id: self.snapshot_id.clone(),
            task_id: self.policy.task_id.clone(),
            view,
            bucket: self.policy.bucket,
            bucket_rank: self.policy.bucket.rank(),
            urgency_score: self.policy.urgency_score,
            deterministic_rank: self.deterministic_rank,
            final_rank: self.final_rank,
            model_score: scored.and_then(|s| s.score),
            model_confidence: scored.map(|s| s.confidence),
            scorer_version: self.score.as_ref().map(|s| s.scorer_version.clone()),
            personalization_applied: self.personalization_applied,
            mode: config.mode,
            config_version: config.version,
            threshold: config.confidence_threshold,
            degraded: self.degraded,
            degraded_reason: self.degraded_reason.clone(),
            served,
            explanation: self.explanation.clone(),
            decided_at,
        }
    }
}

/// Eligible for reordering under `config`: scored, confident enough, and
/// not degraded by the policy engine.
pub fn learned_eligible(candidate: &Candidate, config: &PersonalizationConfig) -> bool {
    !candidate.policy.degraded
        && candidate.score.as_ref().is_some_and(|s| {
            s.outcome == ScoreOutcome::Scored
                && s.score.is_some()
                && s.confidence >= config.confidence_threshold
        })
}

/// Compose candidates into served order. Returns candidates in final order.
pub fn compose(mut candidates: Vec<Candidate>, config: &PersonalizationConfig) -> Vec<ComposedCandidate> {
    candidates.sort_by(|a, b| deterministic_cmp(&a.policy, &b.policy));

    // order[slot] = index into `candidates` (deterministic position).
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    let mut applied = vec![false; candidates.len()];

    if config.bounded_enabled() {
        let mut start = 0;
        while start < candidates.len() {
            let bucket = candidates[start].policy.bucket;
            let end = candidates[start..]
                .iter()
                .position(|c| c.policy.bucket != bucket)
                .map_or(candidates.len(), |offset| start + offset);
            reorder_bucket(&candidates, config, start..end, &mut order, &mut applied);
            start = end;
        }
    }

    let mut final_rank = vec![0u32; candidates.len()];
    for (slot, &idx) in order.iter().enumerate() {
        final_rank[idx] = slot as u32 + 1;
    }

    let mut composed: Vec<ComposedCandidate> = candidates
        .into_iter()
        .enumerate()
        .map(|(idx, c)| {
            let (degraded, degraded_reason) = degradation(&c, config);
            let explanation = explain(&c, config, idx as u32 + 1, final_rank[idx], applied[idx]);
            ComposedCandidate {
                snapshot_id: c.snapshot_id,
                deterministic_rank: idx as u32 + 1,
                final_rank: final_rank[idx],
                personalization_applied: applied[idx],
                degraded,
                degraded_reason,
                explanation,
                policy: c.policy,
                score: c.score,
            }
        })
        .collect();
    composed.sort_by_key(|c| c.final_rank);
    composed
}

/// Permute the eligible candidates of one bucket among their own slots.
fn reorder_bucket(
    candidates: &[Candidate],
    config: &PersonalizationConfig,
    range: std::ops::Range<usize>,
    order: &mut [usize],
    applied: &mut [bool],
) {
    let slots: Vec<usize> = range.filter(|&i| learned_eligible(&candidates[i], config)).collect();
    if slots.len() < 2 {
        return;
    }
    let learned = |i: usize| {
        candidates[i]
            .score
            .as_ref()
            .and_then(|s| s.score)
            .unwrap_or(f64::NEG_INFINITY)
    };
    let mut ranked = slots.clone();
    ranked.sort_by(|&a, &b| learned(b).total_cmp(&learned(a)).then(a.cmp(&b)));
    if ranked == slots {
        return;
    }
    for (&slot, &idx) in slots.iter().zip(&ranked) {
        order[slot] = idx;
        applied[idx] = true;
    }
}

fn degradation(c: &Candidate, config: &PersonalizationConfig) -> (bool, Option<String>) {
    if c.policy.degraded {
        return (true, c.policy.degraded_reason.clone());
    }
    if !config.bounded_enabled() {
        return (false, None);
    }
    match &c.score {
        None => (true, Some("no score recorded".into())),
        Some(s) if s.outcome.is_failure() => (
            true,
            Some(match &s.error {
                Some(e) => format!("scorer {}: {e}", s.outcome),
                None => format!("scorer {}", s.outcome),
            }),
        ),
        Some(_) => (false, None),
    }
}

fn explain(c: &Candidate, config: &PersonalizationConfig, det_rank: u32, final_rank: u32, applied: bool) -> String {
    let p = &c.policy;
    if p.degraded {
        return format!(
            "degraded input ({}); placed in {} at position {final_rank}",
            p.degraded_reason.as_deref().unwrap_or("unknown"),
            p.bucket,
        );
    }

    let base = format!(
        "{} (bucket rank {}); deterministic urgency {:.0} from {}",
        p.bucket,
        p.bucket.rank(),
        p.urgency_score,
        p.components_summary(),
    );

    let learned = match &c.score {
        None => "no learned score".to_string(),
        Some(s) if s.outcome.is_failure() => match config.mode {
            PersonalizationMode::Bounded => format!("scorer {}; deterministic position kept", s.outcome),
            _ => format!("scorer {}", s.outcome),
        },
        Some(s) => {
            let score = s.score.unwrap_or_default();
            match config.mode {
                PersonalizationMode::DeterministicOnly => "deterministic order only".to_string(),
                PersonalizationMode::Shadow => format!(
                    "learned score {score:.2} at confidence {:.2} recorded, not applied (shadow)",
                    s.confidence
                ),
                PersonalizationMode::Bounded if s.confidence < config.confidence_threshold => format!(
                    "learned score {score:.2} below confidence threshold ({:.2} < {:.2}); deterministic position kept",
                    s.confidence, config.confidence_threshold
                ),
                PersonalizationMode::Bounded if applied => format!(
                    "learned contribution {score:.2} at confidence {:.2} moved position {det_rank} to {final_rank} within bucket",
                    s.confidence
                ),
                PersonalizationMode::Bounded => format!(
                    "learned score {score:.2} at confidence {:.2} kept deterministic position",
                    s.confidence
                ),
            }
        }
    };
    format!("{base}; {learned}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use vigil_core::ids::ScoreId;
    use vigil_core::{TaskPriority, TaskSnapshot, TaskStatus};
    use vigil_policy::PolicyEngine;
    use vigil_settings::PolicySettings;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn config(mode: PersonalizationMode) -> PersonalizationConfig {
        PersonalizationConfig {
            mode,
            ..PersonalizationConfig::baseline(0.6, now())
        }
    }

    fn score(task: &TaskId, value: f64, confidence: f64) -> ModelScoreRecord {
        ModelScoreRecord {
            id: ScoreId::new(),
            request_id: RequestId::from_raw("req_1"),
            snapshot_id: SnapshotId::from_raw("snap_1"),
            task_id: task.clone(),
            scorer_version: "test".into(),
            outcome: ScoreOutcome::Scored,
            score: Some(value),
            confidence,
            predicted: None,
            threshold: 0.6,
            eligible: confidence >= 0.6,
            mode: PersonalizationMode::Bounded,
            error: None,
            recorded_at: now(),
        }
    }

    fn candidate(task: TaskSnapshot, learned: Option<(f64, f64)>) -> Candidate {
        let policy = PolicyEngine::new(PolicySettings::default()).evaluate(&task, now());
        Candidate {
            snapshot_id: SnapshotId::from_raw(format!("snap_{}", task.task_id)),
            score: learned.map(|(v, c)| score(&task.task_id, v, c)),
            policy,
        }
    }

    fn due_soon(id: &str, priority: TaskPriority, due: &str) -> TaskSnapshot {
        TaskSnapshot::new(id, TaskStatus::Open).with_priority(priority).with_due_at(due)
    }

    fn ids(composed: &[ComposedCandidate]) -> Vec<&str> {
        composed.iter().map(|c| c.task_id().as_str()).collect()
    }

    fn pair(t1: (f64, f64)) -> Vec<Candidate> {
        vec![
            candidate(due_soon("T0", TaskPriority::P0, "2026-03-02T10:00:00Z"), Some((1.0, 0.9))),
            candidate(due_soon("T1", TaskPriority::P1, "2026-03-02T11:00:00Z"), Some(t1)),
        ]
    }

    #[test]
    fn deterministic_only_ignores_scores() {
        let out = compose(pair((50.0, 0.99)), &config(PersonalizationMode::DeterministicOnly));
        assert_eq!(ids(&out), vec!["T0", "T1"]);
        assert!(out.iter().all(|c| !c.personalization_applied));
        assert!(out[1].explanation.contains("deterministic order only"));
    }

    #[test]
    fn bounded_promotes_confident_candidate() {
        let out = compose(pair((50.0, 0.8)), &config(PersonalizationMode::Bounded));
        assert_eq!(ids(&out), vec!["T1", "T0"]);
        let t1 = &out[0];
        assert!(t1.personalization_applied);
        assert_eq!((t1.deterministic_rank, t1.final_rank), (2, 1));
        assert!(t1.explanation.contains("deterministic urgency 65"));
        assert!(t1.explanation.contains("learned contribution 50.00"));
    }

    #[test]
    fn bounded_respects_confidence_threshold() {
        let out = compose(pair((50.0, 0.4)), &config(PersonalizationMode::Bounded));
        assert_eq!(ids(&out), vec!["T0", "T1"]);
        assert!(!out[1].personalization_applied);
        assert!(out[1].explanation.contains("below confidence threshold"));
    }

    #[test]
    fn shadow_matches_deterministic() {
        let det = compose(pair((50.0, 0.9)), &config(PersonalizationMode::DeterministicOnly));
        let shadow = compose(pair((50.0, 0.9)), &config(PersonalizationMode::Shadow));
        assert_eq!(ids(&det), ids(&shadow));
        assert!(shadow.iter().all(|c| !c.personalization_applied && !c.degraded));
        assert!(shadow[1].explanation.contains("not applied"));
    }

    #[test]
    fn ineligible_candidates_keep_their_slots() {
        let cands = vec![
            candidate(due_soon("A", TaskPriority::P0, "2026-03-02T10:00:00Z"), Some((1.0, 0.9))),
            candidate(due_soon("B", TaskPriority::P1, "2026-03-02T10:00:00Z"), Some((99.0, 0.1))),
            candidate(due_soon("C", TaskPriority::P2, "2026-03-02T10:00:00Z"), Some((5.0, 0.9))),
        ];
        let out = compose(cands, &config(PersonalizationMode::Bounded));
        assert_eq!(ids(&out), vec!["C", "B", "A"]);
        assert!(!out[1].personalization_applied);
    }

    #[test]
    fn scorer_failure_degrades_only_that_candidate_in_bounded() {
        let mut cands = pair((50.0, 0.8));
        if let Some(s) = cands[0].score.as_mut() {
            s.outcome = ScoreOutcome::TimedOut;
            s.score = None;
            s.confidence = 0.0;
        }
        let out = compose(cands, &config(PersonalizationMode::Bounded));
        assert_eq!(ids(&out), vec!["T0", "T1"]);
        assert!(out[0].degraded);
        assert!(!out[1].degraded);
        assert!(out[0].degraded_reason.as_deref().unwrap().contains("timed_out"));
    }

    #[test]
    fn decision_record_carries_context() {
        let out = compose(pair((50.0, 0.8)), &config(PersonalizationMode::Bounded));
        let d = out[0].to_decision(&RequestId::from_raw("req_1"), AttentionView::Current, &config(PersonalizationMode::Bounded), true, now());
        assert_eq!(d.task_id.as_str(), "T1");
        assert_eq!(d.model_confidence, Some(0.8));
        assert!(d.personalization_applied);
        assert_eq!(d.bucket_rank, PriorityBucket::UrgentDueSoon.rank());
    }

    fn arb_candidate() -> impl Strategy<Value = Candidate> {
        (
            0u8..6,
            prop_oneof![Just(TaskPriority::P0), Just(TaskPriority::P1), Just(TaskPriority::P2), Just(TaskPriority::P3)],
            proptest::option::of(-48i64..300),
            -100.0f64..100.0,
            0.0f64..=1.0,
        )
            .prop_map(|(n, priority, due_h, value, confidence)| {
                let status = match n % 4 {
                    0 => TaskStatus::Open,
                    1 => TaskStatus::Blocked,
                    2 => TaskStatus::Snoozed,
                    _ => TaskStatus::InProgress,
                };
                let mut task = TaskSnapshot::new(format!("T{n}-{value:.3}"), status).with_priority(priority);
                if let Some(h) = due_h {
                    task = task.with_due_at((now() + chrono::Duration::hours(h)).to_rfc3339());
                }
                candidate(task, Some((value, confidence)))
            })
    }

    proptest! {
        #[test]
        fn bounded_never_crosses_buckets(cands in proptest::collection::vec(arb_candidate(), 0..16)) {
            let out = compose(cands, &config(PersonalizationMode::Bounded));
            for w in out.windows(2) {
                prop_assert!(w[0].bucket() <= w[1].bucket());
            }
            for (i, c) in out.iter().enumerate() {
                prop_assert_eq!(c.final_rank as usize, i + 1);
                if !c.personalization_applied {
                    prop_assert_eq!(c.final_rank, c.deterministic_rank);
                }
            }
        }
    }
}
