//! Candidate-configuration experiments over recorded history.
//!
//! A run replays the window's recorded requests under the live config and
//! under the candidate, compares them, and checks safety gates. Runs never
//! touch the live config; only [`ExperimentLab::apply`] does, through the
//! mode controller.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vigil_core::ids::{EventId, RunId};
use vigil_core::records::{
    ExperimentAction, ExperimentApplication, ExperimentComparison, ExperimentRun, ScoreOutcome,
};
use vigil_core::{HistoryEvent, HistoryKind, PersonalizationConfig, PersonalizationMode};
use vigil_ranking::{compose, ComposedCandidate, ControlError, ControlUpdate, ModeController};
use vigil_store::{HistoryQuery, HistoryStore};

use crate::error::LabError;
use crate::evaluator::{group_requests, load_window, ReplayEvaluator, GATE_DUPLICATES};
use crate::report::GateStatus;

const HIGH_CONFIDENCE: f64 = 0.7;
const LOW_CONFIDENCE: f64 = 0.5;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRequest {
    pub actor: String,
    pub rationale: String,
    pub candidate_mode: String,
    pub candidate_threshold: f64,
}

/// Trailing-window diagnostics for the operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabOverview {
    pub window_days: u32,
    pub score_records: u32,
    pub high_confidence: u32,
    pub low_confidence: u32,
    pub feedback_evidence: u32,
    pub config: PersonalizationConfig,
}

pub struct ExperimentLab {
    history: Arc<dyn HistoryStore>,
    controller: Arc<ModeController>,
    evaluator: ReplayEvaluator,
    threshold_floor: f64,
}

impl ExperimentLab {
    pub fn new(
        history: Arc<dyn HistoryStore>,
        controller: Arc<ModeController>,
        evaluator: ReplayEvaluator,
        threshold_floor: f64,
    ) -> Self {
        Self {
            history,
            controller,
            evaluator,
            threshold_floor,
        }
    }

    /// Compare a candidate config against the live one over `[start, end]`.
    pub fn run(
        &self,
        request: ExperimentRequest,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExperimentRun, LabError> {
        let (mode, threshold) = ControlUpdate {
            actor: request.actor.clone(),
            rationale: request.rationale.clone(),
            mode: Some(request.candidate_mode.clone()),
            confidence_threshold: Some(request.candidate_threshold),
        }
        .validate()?;
        let mode = mode.unwrap_or(PersonalizationMode::DeterministicOnly);
        let threshold = threshold.unwrap_or(request.candidate_threshold);

        let baseline = self.controller.current();
        let candidate = PersonalizationConfig {
            mode,
            confidence_threshold: threshold,
            ..baseline.clone()
        };

        let events = load_window(self.history.as_ref(), start, end)?;
        let requests = group_requests(&events);
        let report = self.evaluator.evaluate_events(&events, start, end);

        let mut comparison = ExperimentComparison {
            requests: 0,
            candidates: 0,
            scored_records: report.counts.scored,
            baseline_ordering_shift_rate: 0.0,
            candidate_ordering_shift_rate: 0.0,
            baseline_personalized_rate: 0.0,
            candidate_personalized_rate: 0.0,
            bucket_crossings: 0,
        };
        let mut tally = Tally::default();
        for req in requests.iter().filter(|r| !r.snapshots.is_empty()) {
            let base = compose(req.candidates(self.evaluator.engine()), &baseline);
            let cand = compose(req.candidates(self.evaluator.engine()), &candidate);
            comparison.requests += 1;
            comparison.candidates += cand.len() as u32;
            tally.add(&base, &cand);
            if crosses_buckets(&cand) {
                comparison.bucket_crossings += 1;
            }
        }
        if comparison.candidates > 0 {
            let n = f64::from(comparison.candidates);
            comparison.baseline_ordering_shift_rate = f64::from(tally.base_shift) / n;
            comparison.candidate_ordering_shift_rate = f64::from(tally.cand_shift) / n;
            comparison.baseline_personalized_rate = f64::from(tally.base_applied) / n;
            comparison.candidate_personalized_rate = f64::from(tally.cand_applied) / n;
        }

        let mut blocked_reasons = Vec::new();
        if threshold < self.threshold_floor {
            blocked_reasons.push(format!(
                "candidate_shadow_confidence_threshold below safety floor ({threshold:.2} < {:.2})",
                self.threshold_floor
            ));
        }
        if comparison.bucket_crossings > 0 {
            blocked_reasons.push(format!(
                "bucket crossing in {} replayed requests",
                comparison.bucket_crossings
            ));
        }
        let min_shadow = self.evaluator.settings().min_shadow_records;
        if mode == PersonalizationMode::Bounded && comparison.scored_records < min_shadow {
            blocked_reasons.push(format!(
                "insufficient shadow data ({} scored records, need {min_shadow})",
                comparison.scored_records
            ));
        }
        if report.gate(GATE_DUPLICATES).is_some_and(|g| g.status == GateStatus::Fail) {
            blocked_reasons.push("duplicate reminder rate above threshold".to_string());
        }

        let run = ExperimentRun {
            id: RunId::new(),
            actor: request.actor,
            rationale: request.rationale,
            baseline,
            candidate_mode: mode,
            candidate_threshold: threshold,
            window_start: start,
            window_end: end,
            comparison,
            blocked_reasons,
            created_at: now,
        };
        let _ = self.history.append(HistoryEvent::ExperimentRun(run.clone()))?;
        info!(
            run_id = %run.id,
            candidate_mode = %run.candidate_mode,
            ready = run.is_ready(),
            "experiment run recorded"
        );
        Ok(run)
    }

    /// Act on a recorded run. `apply` succeeds only for a run whose safety
    /// gates passed and whose baseline is still the live config.
    pub async fn apply(
        &self,
        run_id: &RunId,
        action: ExperimentAction,
        actor: &str,
        rationale: &str,
        now: DateTime<Utc>,
    ) -> Result<ExperimentApplication, LabError> {
        let run = self.find_run(run_id)?;
        let mut application = ExperimentApplication {
            id: EventId::new(),
            run_id: run.id.clone(),
            action,
            actor: actor.to_string(),
            rationale: rationale.to_string(),
            applied: false,
            reason: None,
            config_version: None,
            at: now,
        };

        match action {
            ExperimentAction::Apply => {
                if !run.is_ready() {
                    return Err(self.refuse(application, run.blocked_reasons.join("; "))?);
                }
                let update = ControlUpdate {
                    actor: actor.to_string(),
                    rationale: rationale.to_string(),
                    mode: Some(run.candidate_mode.as_str().to_string()),
                    confidence_threshold: Some(run.candidate_threshold),
                };
                let config = match self.controller.apply_if_version(run.baseline.version, update, now).await {
                    Ok(config) => config,
                    Err(ControlError::VersionConflict { actual, .. }) => {
                        let reason = format!(
                            "live config changed since experiment run (v{} -> v{actual})",
                            run.baseline.version
                        );
                        return Err(self.refuse(application, reason)?);
                    }
                    Err(e) => return Err(e.into()),
                };
                application.applied = true;
                application.config_version = Some(config.version);
            }
            ExperimentAction::Rollback => {
                let outcome = self.controller.rollback(actor, rationale, now).await;
                application.applied = true;
                application.config_version = Some(outcome.config.version);
                if !outcome.audit_persisted {
                    application.reason = Some("rollback audit not persisted".to_string());
                }
            }
            ExperimentAction::NoOp => {
                application.reason = Some("no_op".to_string());
            }
        }

        let _ = self.history.append(HistoryEvent::ExperimentApplied(application.clone()))?;
        info!(run_id = %run.id, action = action.as_str(), applied = application.applied, "experiment action recorded");
        Ok(application)
    }

    /// Recorded runs, newest first.
    pub fn history(&self, limit: u32) -> Result<Vec<ExperimentRun>, LabError> {
        Ok(self
            .history
            .query(&HistoryQuery::kind(HistoryKind::ExperimentRun).newest_first().limit(limit))?
            .into_iter()
            .filter_map(|entry| match entry.event {
                HistoryEvent::ExperimentRun(run) => Some(run),
                _ => None,
            })
            .collect())
    }

    pub fn overview(&self, now: DateTime<Utc>) -> Result<LabOverview, LabError> {
        let window_days = self.evaluator.settings().window_days;
        let since = now - Duration::days(i64::from(window_days));
        let rows = self.history.query(
            &HistoryQuery::kinds(&[HistoryKind::ModelScore, HistoryKind::FeedbackEvidence]).between(since, now),
        )?;

        let mut overview = LabOverview {
            window_days,
            score_records: 0,
            high_confidence: 0,
            low_confidence: 0,
            feedback_evidence: 0,
            config: self.controller.current(),
        };
        for entry in rows {
            match entry.event {
                HistoryEvent::ModelScore(s) => {
                    overview.score_records += 1;
                    if s.outcome == ScoreOutcome::Scored && s.confidence >= HIGH_CONFIDENCE {
                        overview.high_confidence += 1;
                    }
                    if s.confidence < LOW_CONFIDENCE {
                        overview.low_confidence += 1;
                    }
                }
                HistoryEvent::FeedbackEvidence(_) => overview.feedback_evidence += 1,
                _ => {}
            }
        }
        Ok(overview)
    }

    /// Record a refused apply and build the error for it. Fails only when
    /// the refusal itself cannot be recorded.
    fn refuse(&self, mut application: ExperimentApplication, reason: String) -> Result<LabError, LabError> {
        warn!(run_id = %application.run_id, reason = %reason, "experiment apply refused");
        application.reason = Some(reason.clone());
        let run_id = application.run_id.to_string();
        let _ = self.history.append(HistoryEvent::ExperimentApplied(application))?;
        Ok(LabError::SafetyGateViolation { run_id, reason })
    }

    fn find_run(&self, run_id: &RunId) -> Result<ExperimentRun, LabError> {
        self.history
            .query(&HistoryQuery::kind(HistoryKind::ExperimentRun))?
            .into_iter()
            .find_map(|entry| match entry.event {
                HistoryEvent::ExperimentRun(run) if run.id == *run_id => Some(run),
                _ => None,
            })
            .ok_or_else(|| LabError::NotFound(run_id.to_string()))
    }
}

#[derive(Default)]
struct Tally {
    base_shift: u32,
    cand_shift: u32,
    base_applied: u32,
    cand_applied: u32,
}

impl Tally {
    fn add(&mut self, base: &[ComposedCandidate], cand: &[ComposedCandidate]) {
        let shifted = |c: &&ComposedCandidate| c.final_rank != c.deterministic_rank;
        let applied = |c: &&ComposedCandidate| c.personalization_applied;
        self.base_shift += base.iter().filter(shifted).count() as u32;
        self.cand_shift += cand.iter().filter(shifted).count() as u32;
        self.base_applied += base.iter().filter(applied).count() as u32;
        self.cand_applied += cand.iter().filter(applied).count() as u32;
    }
}

/// Served order must be bucket-monotone.
fn crosses_buckets(composed: &[ComposedCandidate]) -> bool {
    composed.windows(2).any(|w| w[0].bucket() > w[1].bucket())
}
