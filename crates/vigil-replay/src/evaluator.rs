//! Offline evaluation of a history window.
//!
//! Everything is derived from recorded events: no scorer is called and no
//! live state is touched. Recorded decisions are re-derived from their
//! snapshots and score records through the same policy engine and composer
//! the live path uses.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};

use vigil_core::ids::{RequestId, SnapshotId};
use vigil_core::records::{
    ConfigAudit, ControlCommand, FeatureSnapshot, FeedbackEvidence, ModelScoreRecord, RankingDecision,
    RecommendedAction, ScoreOutcome,
};
use vigil_core::{HistoryEvent, PersonalizationConfig, PersonalizationMode};
use vigil_policy::PolicyEngine;
use vigil_ranking::{compose, Candidate};
use vigil_settings::ReplaySettings;
use vigil_store::{HistoryQuery, HistoryStore};

use crate::error::ReplayError;
use crate::report::{
    CalibrationRow, EventCounts, GateResult, ReplayMetrics, ReplayReport, ReproductionSummary, TargetMeans,
};

pub const GATE_ACCEPTANCE_NONZERO: &str = "acceptance_rate_nonzero";
pub const GATE_UPLIFT: &str = "acceptance_uplift_non_negative";
pub const GATE_DUPLICATES: &str = "duplicate_rate_below_threshold";
pub const GATE_ORDERING_SHIFT: &str = "ordering_shift_rate_below_threshold";
pub const GATE_SHADOW_DATA: &str = "shadow_data_sufficient";
pub const GATE_CALIBRATION: &str = "calibration_within_tolerance";
pub const GATE_REPRODUCIBLE: &str = "decisions_reproducible";
pub const GATE_ROLLBACK: &str = "rollback_verified";

const ACCEPTED_USEFULNESS: f64 = 0.5;
const MAX_MISMATCH_EXAMPLES: usize = 10;
const URGENCY_EPSILON: f64 = 1e-9;

/// One recorded ranking request, regrouped from the event stream.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub request_id: RequestId,
    pub snapshots: Vec<FeatureSnapshot>,
    pub scores: HashMap<SnapshotId, ModelScoreRecord>,
    pub decisions: Vec<RankingDecision>,
}

impl RecordedRequest {
    /// Candidates as the composer saw them.
    pub fn candidates(&self, engine: &PolicyEngine) -> Vec<Candidate> {
        self.snapshots
            .iter()
            .map(|s| Candidate {
                snapshot_id: s.id.clone(),
                policy: engine.evaluate_snapshot(s),
                score: self.scores.get(&s.id).cloned(),
            })
            .collect()
    }

    /// Config in force when the request was decided.
    pub fn config(&self) -> Option<PersonalizationConfig> {
        self.decisions.first().map(|d| PersonalizationConfig {
            version: d.config_version,
            mode: d.mode,
            confidence_threshold: d.threshold,
            updated_at: d.decided_at,
            updated_by: String::new(),
        })
    }
}

/// Regroup snapshots, scores and decisions by request, in first-seen order.
pub fn group_requests(events: &[HistoryEvent]) -> Vec<RecordedRequest> {
    let mut order: Vec<RequestId> = Vec::new();
    let mut by_id: HashMap<RequestId, RecordedRequest> = HashMap::new();
    for event in events {
        let request_id = match event {
            HistoryEvent::FeatureSnapshot(s) => &s.request_id,
            HistoryEvent::ModelScore(s) => &s.request_id,
            HistoryEvent::RankingDecision(d) => &d.request_id,
            _ => continue,
        };
        let req = by_id.entry(request_id.clone()).or_insert_with(|| {
            order.push(request_id.clone());
            RecordedRequest {
                request_id: request_id.clone(),
                snapshots: Vec::new(),
                scores: HashMap::new(),
                decisions: Vec::new(),
            }
        });
        match event {
            HistoryEvent::FeatureSnapshot(s) => req.snapshots.push(s.clone()),
            HistoryEvent::ModelScore(s) => {
                req.scores.insert(s.snapshot_id.clone(), s.clone());
            }
            HistoryEvent::RankingDecision(d) => req.decisions.push(d.clone()),
            _ => {}
        }
    }
    order.into_iter().filter_map(|id| by_id.remove(&id)).collect()
}

pub struct ReplayEvaluator {
    engine: PolicyEngine,
    settings: ReplaySettings,
}

impl ReplayEvaluator {
    pub fn new(engine: PolicyEngine, settings: ReplaySettings) -> Self {
        Self { engine, settings }
    }

    pub fn engine(&self) -> &PolicyEngine {
        &self.engine
    }

    pub fn settings(&self) -> &ReplaySettings {
        &self.settings
    }

    /// Load `[start, end]` from history and evaluate it.
    pub fn evaluate(
        &self,
        history: &dyn HistoryStore,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ReplayReport, ReplayError> {
        let events = load_window(history, start, end)?;
        Ok(self.evaluate_events(&events, start, end))
    }

    /// Evaluate an already-loaded event stream. Never fails; missing data
    /// shows up as `insufficient_data` gates.
    pub fn evaluate_events(&self, events: &[HistoryEvent], start: DateTime<Utc>, end: DateTime<Utc>) -> ReplayReport {
        let requests = group_requests(events);
        let evidence: Vec<&FeedbackEvidence> = events
            .iter()
            .filter_map(|e| match e {
                HistoryEvent::FeedbackEvidence(ev) => Some(ev),
                _ => None,
            })
            .collect();
        let decisions: Vec<&RankingDecision> = requests.iter().flat_map(|r| &r.decisions).collect();
        let scores: Vec<&ModelScoreRecord> = requests.iter().flat_map(|r| r.scores.values()).collect();

        let counts = count(events, &requests);
        let metrics = ReplayMetrics {
            acceptance_rate: acceptance_rate(evidence.iter().copied()),
            acceptance_uplift_vs_baseline: acceptance_uplift(&evidence, &decisions),
            duplicate_reminder_rate: duplicate_rate(events),
            ordering_shift_rate: ratio(
                decisions.iter().filter(|d| d.final_rank != d.deterministic_rank).count(),
                decisions.len(),
            ),
            confidence_above_threshold_rate: ratio(
                scores
                    .iter()
                    .filter(|s| s.outcome == ScoreOutcome::Scored && s.confidence >= s.threshold)
                    .count(),
                scores.len(),
            ),
            mean_labels: mean_labels(&evidence),
        };
        let calibration = calibrate(&evidence, &scores);
        let reproduction = self.reproduce(&requests);

        let gates = vec![
            self.acceptance_gate(&metrics),
            uplift_gate(&metrics),
            self.duplicate_gate(&metrics),
            self.ordering_gate(&metrics),
            self.shadow_gate(&counts),
            self.calibration_gate(&calibration),
            reproduction_gate(&reproduction),
            rollback_gate(events, &decisions),
        ];
        let rollout_ready = gates.iter().all(|g| g.passed);

        ReplayReport {
            window_start: start,
            window_end: end,
            counts,
            metrics,
            calibration,
            reproduction,
            gates,
            rollout_ready,
        }
    }

    /// Re-derive every recorded decision from its inputs.
    pub fn reproduce(&self, requests: &[RecordedRequest]) -> ReproductionSummary {
        let mut summary = ReproductionSummary::default();

        for req in requests {
            let Some(config) = req.config() else { continue };
            let composed = compose(req.candidates(&self.engine), &config);
            let snapshots: HashMap<&SnapshotId, &FeatureSnapshot> = req.snapshots.iter().map(|s| (&s.id, s)).collect();

            for d in &req.decisions {
                summary.checked += 1;
                let intact = snapshots.get(&d.snapshot_id).is_some_and(|s| s.verify_digest());
                if !intact {
                    summary.missing_inputs += 1;
                    note(&mut summary, format!("{}: snapshot {} missing or altered", d.id, d.snapshot_id));
                    continue;
                }
                let Some(c) = composed.iter().find(|c| c.snapshot_id == d.snapshot_id) else {
                    note(&mut summary, format!("{}: candidate not recomposed", d.id));
                    continue;
                };
                if c.policy.bucket != d.bucket
                    || (c.policy.urgency_score - d.urgency_score).abs() > URGENCY_EPSILON
                    || c.deterministic_rank != d.deterministic_rank
                    || c.final_rank != d.final_rank
                    || c.personalization_applied != d.personalization_applied
                {
                    note(
                        &mut summary,
                        format!(
                            "{} ({}): recorded {}#{} -> {}, replayed {}#{} -> {}",
                            d.id,
                            d.task_id,
                            d.bucket,
                            d.deterministic_rank,
                            d.final_rank,
                            c.policy.bucket,
                            c.deterministic_rank,
                            c.final_rank
                        ),
                    );
                }
            }
        }
        summary
    }

    fn acceptance_gate(&self, m: &ReplayMetrics) -> GateResult {
        match m.acceptance_rate {
            None => GateResult::insufficient(GATE_ACCEPTANCE_NONZERO, None, Some(0.0)),
            Some(r) if r > 0.0 => GateResult::pass(GATE_ACCEPTANCE_NONZERO, "acceptance observed", Some(r), Some(0.0)),
            Some(r) => GateResult::fail(GATE_ACCEPTANCE_NONZERO, "no accepted feedback", Some(r), Some(0.0)),
        }
    }

    fn duplicate_gate(&self, m: &ReplayMetrics) -> GateResult {
        let max = self.settings.max_duplicate_reminder_rate;
        match m.duplicate_reminder_rate {
            // Nothing sent means nothing duplicated.
            None => GateResult::pass(GATE_DUPLICATES, "no reminders sent", Some(0.0), Some(max)),
            Some(r) if r <= max => GateResult::pass(GATE_DUPLICATES, "within threshold", Some(r), Some(max)),
            Some(r) => GateResult::fail(GATE_DUPLICATES, "duplicate reminder rate above threshold", Some(r), Some(max)),
        }
    }

    fn ordering_gate(&self, m: &ReplayMetrics) -> GateResult {
        let max = self.settings.max_ordering_shift_rate;
        match m.ordering_shift_rate {
            None => GateResult::insufficient(GATE_ORDERING_SHIFT, None, Some(max)),
            Some(r) if r <= max => GateResult::pass(GATE_ORDERING_SHIFT, "within threshold", Some(r), Some(max)),
            Some(r) => GateResult::fail(GATE_ORDERING_SHIFT, "ordering shift rate above threshold", Some(r), Some(max)),
        }
    }

    fn shadow_gate(&self, counts: &EventCounts) -> GateResult {
        let min = f64::from(self.settings.min_shadow_records);
        let observed = f64::from(counts.scored);
        if counts.scored >= self.settings.min_shadow_records {
            GateResult::pass(GATE_SHADOW_DATA, "enough scored records", Some(observed), Some(min))
        } else {
            GateResult::insufficient(GATE_SHADOW_DATA, Some(observed), Some(min))
        }
    }

    fn calibration_gate(&self, rows: &[CalibrationRow]) -> GateResult {
        let max = self.settings.max_calibration_gap;
        let worst = rows.iter().map(|r| r.gap).fold(None, |acc: Option<f64>, g| Some(acc.map_or(g, |a| a.max(g))));
        match worst {
            None => GateResult::insufficient(GATE_CALIBRATION, None, Some(max)),
            Some(g) if g <= max => GateResult::pass(GATE_CALIBRATION, "all targets within tolerance", Some(g), Some(max)),
            Some(g) => {
                let target = rows
                    .iter()
                    .find(|r| r.gap == g)
                    .map_or("unknown", |r| r.target.as_str());
                GateResult::fail(GATE_CALIBRATION, format!("{target} gap above tolerance"), Some(g), Some(max))
            }
        }
    }
}

fn note(summary: &mut ReproductionSummary, msg: String) {
    summary.mismatched += 1;
    if summary.examples.len() < MAX_MISMATCH_EXAMPLES {
        summary.examples.push(msg);
    }
}

fn uplift_gate(m: &ReplayMetrics) -> GateResult {
    match m.acceptance_uplift_vs_baseline {
        None => GateResult::insufficient(GATE_UPLIFT, None, Some(0.0)),
        Some(u) if u >= 0.0 => GateResult::pass(GATE_UPLIFT, "personalized acceptance not worse", Some(u), Some(0.0)),
        Some(u) => GateResult::fail(GATE_UPLIFT, "personalized acceptance below baseline", Some(u), Some(0.0)),
    }
}

fn reproduction_gate(r: &ReproductionSummary) -> GateResult {
    if r.checked == 0 {
        return GateResult::insufficient(GATE_REPRODUCIBLE, None, Some(0.0));
    }
    let observed = Some(f64::from(r.mismatched));
    if r.mismatched == 0 {
        GateResult::pass(GATE_REPRODUCIBLE, format!("{} decisions reproduced", r.checked), observed, Some(0.0))
    } else {
        GateResult::fail(GATE_REPRODUCIBLE, format!("{} of {} decisions differ", r.mismatched, r.checked), observed, Some(0.0))
    }
}

/// After the latest rollback, every decision until the next config change
/// must be deterministic-only and unpersonalized.
fn rollback_gate(events: &[HistoryEvent], decisions: &[&RankingDecision]) -> GateResult {
    let audits: Vec<&ConfigAudit> = events
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::ConfigChanged(a) => Some(a),
            _ => None,
        })
        .collect();
    let Some(pos) = audits.iter().rposition(|a| a.command == ControlCommand::Rollback) else {
        return GateResult::insufficient(GATE_ROLLBACK, None, None);
    };
    let rollback = audits[pos];
    let next_change = audits.get(pos + 1).map(|a| a.at);

    let after: Vec<&&RankingDecision> = decisions
        .iter()
        .filter(|d| d.decided_at >= rollback.at && next_change.map_or(true, |n| d.decided_at < n))
        .collect();
    let violations = after
        .iter()
        .filter(|d| d.mode != PersonalizationMode::DeterministicOnly || d.personalization_applied)
        .count();
    if violations == 0 {
        GateResult::pass(
            GATE_ROLLBACK,
            format!("{} decisions after rollback were deterministic", after.len()),
            Some(0.0),
            Some(0.0),
        )
    } else {
        GateResult::fail(
            GATE_ROLLBACK,
            format!("{violations} decisions after rollback were personalized"),
            Some(violations as f64),
            Some(0.0),
        )
    }
}

pub fn load_window(
    history: &dyn HistoryStore,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<HistoryEvent>, ReplayError> {
    if start > end {
        return Err(ReplayError::InvalidWindow { start, end });
    }
    Ok(history
        .query(&HistoryQuery::all().between(start, end))?
        .into_iter()
        .map(|entry| entry.event)
        .collect())
}

fn count(events: &[HistoryEvent], requests: &[RecordedRequest]) -> EventCounts {
    let mut c = EventCounts {
        requests: requests.iter().filter(|r| !r.decisions.is_empty()).count() as u32,
        ..EventCounts::default()
    };
    for e in events {
        match e {
            HistoryEvent::FeatureSnapshot(_) => c.snapshots += 1,
            HistoryEvent::ModelScore(s) => {
                c.score_records += 1;
                if s.outcome == ScoreOutcome::Scored {
                    c.scored += 1;
                }
            }
            HistoryEvent::RankingDecision(_) => c.decisions += 1,
            HistoryEvent::FeedbackEvidence(_) => c.feedback_evidence += 1,
            HistoryEvent::ReminderSent(_) => c.reminders_sent += 1,
            HistoryEvent::ConfigChanged(_) => c.config_changes += 1,
            _ => {}
        }
    }
    c
}

fn ratio(numerator: usize, denominator: usize) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

fn is_accepted(e: &FeedbackEvidence) -> Option<bool> {
    e.labels
        .usefulness
        .map(|u| e.recommended == RecommendedAction::Keep && u >= ACCEPTED_USEFULNESS)
}

pub fn acceptance_rate<'a>(evidence: impl Iterator<Item = &'a FeedbackEvidence>) -> Option<f64> {
    let (accepted, total) = evidence
        .filter_map(is_accepted)
        .fold((0usize, 0usize), |(a, t), ok| (a + usize::from(ok), t + 1));
    ratio(accepted, total)
}

/// Latest decision for the same task at or before `at`.
fn preceding_decision<'a>(decisions: &[&'a RankingDecision], e: &FeedbackEvidence) -> Option<&'a RankingDecision> {
    decisions
        .iter()
        .filter(|d| d.task_id == e.task_id && d.decided_at <= e.action_at)
        .max_by_key(|d| d.decided_at)
        .copied()
}

fn acceptance_uplift(evidence: &[&FeedbackEvidence], decisions: &[&RankingDecision]) -> Option<f64> {
    let (personalized, baseline): (Vec<&FeedbackEvidence>, Vec<&FeedbackEvidence>) = evidence
        .iter()
        .copied()
        .filter(|e| e.labels.usefulness.is_some())
        .filter_map(|e| preceding_decision(decisions, e).map(|d| (e, d.personalization_applied)))
        .fold((Vec::new(), Vec::new()), |(mut p, mut b), (e, applied)| {
            if applied {
                p.push(e);
            } else {
                b.push(e);
            }
            (p, b)
        });
    let p = acceptance_rate(personalized.into_iter())?;
    let b = acceptance_rate(baseline.into_iter())?;
    Some(p - b)
}

fn duplicate_rate(events: &[HistoryEvent]) -> Option<f64> {
    let mut seen = HashSet::new();
    let mut total = 0usize;
    let mut duplicates = 0usize;
    for e in events {
        if let HistoryEvent::ReminderSent(r) = e {
            total += 1;
            if !seen.insert(r.dedup_key.as_str()) {
                duplicates += 1;
            }
        }
    }
    ratio(duplicates, total)
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn mean_labels(evidence: &[&FeedbackEvidence]) -> TargetMeans {
    TargetMeans {
        usefulness: mean(evidence.iter().filter_map(|e| e.labels.usefulness)),
        timing_fit: mean(evidence.iter().filter_map(|e| e.labels.timing_fit)),
        interrupt_cost: mean(evidence.iter().filter_map(|e| e.labels.interrupt_cost)),
    }
}

/// Pair each piece of evidence with the latest preceding scored prediction
/// for the same task, then compare means per target.
fn calibrate(evidence: &[&FeedbackEvidence], scores: &[&ModelScoreRecord]) -> Vec<CalibrationRow> {
    let mut pairs: BTreeMap<&'static str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
    for e in evidence {
        let prediction = scores
            .iter()
            .filter(|s| s.task_id == e.task_id && s.recorded_at <= e.action_at && s.outcome == ScoreOutcome::Scored)
            .filter_map(|s| s.predicted.map(|p| (s.recorded_at, p)))
            .max_by_key(|(at, _)| *at)
            .map(|(_, p)| p);
        let Some(predicted) = prediction else { continue };
        for ((target, observed), (_, predicted)) in e.labels.targets().into_iter().zip(predicted.targets()) {
            if let (Some(o), Some(p)) = (observed, predicted) {
                let entry = pairs.entry(target).or_default();
                entry.0.push(o);
                entry.1.push(p);
            }
        }
    }
    pairs
        .into_iter()
        .filter_map(|(target, (observed, predicted))| {
            let mean_observed = mean(observed.iter().copied())?;
            let mean_predicted = mean(predicted.iter().copied())?;
            Some(CalibrationRow {
                target: target.to_string(),
                samples: observed.len() as u32,
                mean_observed,
                mean_predicted,
                gap: (mean_observed - mean_predicted).abs(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use vigil_core::ids::{EventId, EvidenceId, TaskId};
    use vigil_core::records::{ContextSummary, FeedbackAction, ReminderSent, TargetScores};
    use vigil_core::{DedupKey, ReminderCondition};
    use vigil_settings::PolicySettings;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn evaluator() -> ReplayEvaluator {
        ReplayEvaluator::new(PolicyEngine::new(PolicySettings::default()), ReplaySettings::default())
    }

    fn evidence(task: &str, usefulness: Option<f64>, recommended: RecommendedAction, minute: i64) -> HistoryEvent {
        let action_id = EventId::new();
        HistoryEvent::FeedbackEvidence(FeedbackEvidence {
            id: EvidenceId::for_action(&action_id),
            action_event_id: action_id,
            task_id: TaskId::from_raw(task),
            action: FeedbackAction::Dismiss,
            action_at: t(minute),
            labels: TargetScores {
                usefulness,
                timing_fit: None,
                interrupt_cost: None,
            },
            confidence: 0.6,
            recommended,
            rule: "test".into(),
            context: ContextSummary {
                start: t(minute - 60),
                end: t(minute + 60),
                followup_observed: true,
                event_ids: vec![],
            },
        })
    }

    fn reminder(key: &str, minute: i64) -> HistoryEvent {
        HistoryEvent::ReminderSent(ReminderSent {
            task_id: TaskId::from_raw("T1"),
            dedup_key: DedupKey::from_raw(key),
            condition: ReminderCondition::DueSoon,
            at: t(minute),
        })
    }

    #[test]
    fn empty_window_completes_with_insufficient_gates() {
        let report = evaluator().evaluate_events(&[], t(0), t(60));
        let gate = report.gate(GATE_ACCEPTANCE_NONZERO).unwrap();
        assert!(!gate.passed);
        assert_eq!(gate.reason, "insufficient_data");
        assert!(!report.rollout_ready);
        assert_eq!(report.gates.len(), 8);
    }

    #[test]
    fn acceptance_counts_only_determinate_keep() {
        let events = vec![
            evidence("T1", Some(0.85), RecommendedAction::Keep, 0),
            evidence("T2", Some(0.25), RecommendedAction::Deprioritize, 1),
            evidence("T3", None, RecommendedAction::Keep, 2),
            evidence("T4", Some(0.8), RecommendedAction::Retime, 3),
        ];
        let report = evaluator().evaluate_events(&events, t(0), t(60));
        let rate = report.metrics.acceptance_rate.unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);
        assert!(report.gate(GATE_ACCEPTANCE_NONZERO).unwrap().passed);
    }

    #[test]
    fn duplicate_reminders_fail_the_gate() {
        let events = vec![reminder("a", 0), reminder("a", 5), reminder("b", 6)];
        let report = evaluator().evaluate_events(&events, t(0), t(60));
        let rate = report.metrics.duplicate_reminder_rate.unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);
        assert!(!report.gate(GATE_DUPLICATES).unwrap().passed);
    }

    #[test]
    fn no_reminders_pass_the_duplicate_gate() {
        let report = evaluator().evaluate_events(&[], t(0), t(60));
        assert!(report.gate(GATE_DUPLICATES).unwrap().passed);
    }

    #[test]
    fn rollback_gate_needs_a_rollback() {
        let report = evaluator().evaluate_events(&[], t(0), t(60));
        assert_eq!(
            report.gate(GATE_ROLLBACK).unwrap().status,
            crate::report::GateStatus::InsufficientData
        );
    }
}
