use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use vigil_core::ids::{DecisionId, RequestId, TaskId};
use vigil_core::records::{FeatureSnapshot, RankingDecision};
use vigil_core::{AttentionView, HistoryEvent, HistoryKind, PersonalizationMode, PriorityBucket, TaskSnapshot};
use vigil_policy::{extract_features, PolicyEngine};
use vigil_settings::ViewSettings;
use vigil_store::{HistoryQuery, HistoryStore};

use crate::composer::{compose, Candidate};
use crate::controller::ModeController;
use crate::error::AttentionError;
use crate::harness::ScoringHarness;

#[derive(Clone, Debug)]
pub struct RankRequest {
    pub view: AttentionView,
    pub tasks: Vec<TaskSnapshot>,
    pub now: DateTime<Utc>,
    /// Overrides the view's default limit.
    pub limit: Option<usize>,
}

/// What a caller receives for one served candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub task_id: TaskId,
    pub title: String,
    pub urgency_score: f64,
    pub priority_bucket: PriorityBucket,
    pub personalization_applied: bool,
    pub ranking_explanation: String,
    pub model_score: Option<f64>,
    pub model_confidence: Option<f64>,
    pub final_rank: u32,
    pub degraded: bool,
    pub decision_id: DecisionId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankResponse {
    pub request_id: RequestId,
    pub view: AttentionView,
    pub mode: PersonalizationMode,
    pub config_version: u64,
    pub items: Vec<CandidatePayload>,
}

/// Per-request orchestration: extract, decide, score, compose, record.
pub struct AttentionService {
    engine: PolicyEngine,
    harness: ScoringHarness,
    controller: Arc<ModeController>,
    history: Arc<dyn HistoryStore>,
    views: ViewSettings,
}

impl AttentionService {
    pub fn new(
        engine: PolicyEngine,
        harness: ScoringHarness,
        controller: Arc<ModeController>,
        history: Arc<dyn HistoryStore>,
        views: ViewSettings,
    ) -> Self {
        Self {
            engine,
            harness,
            controller,
            history,
            views,
        }
    }

    pub fn controller(&self) -> &Arc<ModeController> {
        &self.controller
    }

    /// Rank the tasks of one view.
    ///
    /// Decisions for every composed candidate are appended before anything
    /// is returned, so a served candidate always has a recorded decision.
    /// Score records are kept even when the request is cancelled.
    #[instrument(skip_all, fields(view = request.view.as_str(), tasks = request.tasks.len()))]
    pub async fn rank(&self, request: RankRequest, cancel: &CancellationToken) -> Result<RankResponse, AttentionError> {
        let config = self.controller.current();
        let request_id = RequestId::new();
        let now = request.now;
        let view = request.view;

        let snapshots: Vec<FeatureSnapshot> = request
            .tasks
            .into_iter()
            .filter(|t| !t.status.is_terminal())
            .map(|task| {
                let features = extract_features(&task, now).map_err(|e| e.to_string());
                FeatureSnapshot::capture(request_id.clone(), task, now, features)
            })
            .filter(|s| self.in_view(view, s))
            .collect();

        let scores = self
            .harness
            .score_all(&request_id, &snapshots, &config, cancel, now)
            .await;

        if cancel.is_cancelled() {
            let mut events: Vec<HistoryEvent> = snapshots.into_iter().map(HistoryEvent::FeatureSnapshot).collect();
            events.extend(scores.into_iter().map(HistoryEvent::ModelScore));
            self.history.append_batch(events)?;
            warn!(request_id = %request_id, "ranking cancelled; score records kept");
            return Err(AttentionError::Cancelled);
        }

        let candidates: Vec<Candidate> = snapshots
            .iter()
            .zip(&scores)
            .map(|(snapshot, score)| Candidate {
                snapshot_id: snapshot.id.clone(),
                policy: self.engine.evaluate_snapshot(snapshot),
                score: Some(score.clone()),
            })
            .collect();
        let composed = compose(candidates, &config);

        let limit = request.limit.or(match view {
            AttentionView::Current => Some(self.views.current_limit),
            AttentionView::Upcoming => None,
        });
        let decisions: Vec<RankingDecision> = composed
            .iter()
            .map(|c| {
                let served = limit.map_or(true, |l| (c.final_rank as usize) <= l);
                c.to_decision(&request_id, view, &config, served, now)
            })
            .collect();

        let degraded = decisions.iter().filter(|d| d.degraded).count();
        if degraded > 0 {
            warn!(request_id = %request_id, degraded, "degraded candidates in ranking");
        }

        let mut events: Vec<HistoryEvent> = Vec::with_capacity(snapshots.len() * 2 + decisions.len());
        let titles: Vec<(TaskId, String)> = snapshots
            .iter()
            .map(|s| (s.task.task_id.clone(), s.task.title.clone()))
            .collect();
        events.extend(snapshots.into_iter().map(HistoryEvent::FeatureSnapshot));
        events.extend(scores.into_iter().map(HistoryEvent::ModelScore));
        events.extend(decisions.iter().cloned().map(HistoryEvent::RankingDecision));
        self.history.append_batch(events)?;

        let items: Vec<CandidatePayload> = decisions
            .into_iter()
            .filter(|d| d.served)
            .map(|d| CandidatePayload {
                title: titles
                    .iter()
                    .find(|(id, _)| *id == d.task_id)
                    .map(|(_, t)| t.clone())
                    .unwrap_or_default(),
                task_id: d.task_id,
                urgency_score: d.urgency_score,
                priority_bucket: d.bucket,
                personalization_applied: d.personalization_applied,
                ranking_explanation: d.explanation,
                model_score: d.model_score,
                model_confidence: d.model_confidence,
                final_rank: d.final_rank,
                degraded: d.degraded,
                decision_id: d.id,
            })
            .collect();

        info!(
            request_id = %request_id,
            mode = %config.mode,
            served = items.len(),
            "ranking served"
        );
        Ok(RankResponse {
            request_id,
            view,
            mode: config.mode,
            config_version: config.version,
            items,
        })
    }

    /// Most recent decision recorded for `task_id`.
    pub fn latest_decision(&self, task_id: &TaskId) -> Result<RankingDecision, AttentionError> {
        let rows = self.history.query(
            &HistoryQuery::kind(HistoryKind::RankingDecision)
                .for_task(task_id)
                .newest_first()
                .limit(1),
        )?;
        rows.into_iter()
            .find_map(|entry| match entry.event {
                HistoryEvent::RankingDecision(d) => Some(d),
                _ => None,
            })
            .ok_or_else(|| AttentionError::NotFound(format!("no ranking decision for task {task_id}")))
    }

    fn in_view(&self, view: AttentionView, snapshot: &FeatureSnapshot) -> bool {
        match view {
            AttentionView::Current => true,
            AttentionView::Upcoming => {
                let horizon = f64::from(self.views.upcoming_horizon_hours);
                let keep = snapshot
                    .features
                    .as_ref()
                    .and_then(|f| f.hours_to_due)
                    .is_some_and(|h| (0.0..=horizon).contains(&h));
                if !keep {
                    debug!(task_id = %snapshot.task.task_id, "outside upcoming horizon");
                }
                keep
            }
        }
    }
}
