//! Bounded, fail-safe invocation of the scoring capability.
//!
//! Every candidate gets exactly one [`ModelScoreRecord`], whatever happens
//! to its scorer call. Failures, panics, invalid outputs, timeouts and
//! cancellation all become zero-confidence records; nothing propagates to
//! the caller.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use vigil_core::ids::{RequestId, ScoreId};
use vigil_core::records::{FeatureSnapshot, ModelScoreRecord, ScoreOutcome};
use vigil_core::{PersonalizationConfig, ScoreOutput, ScoreRequest, Scorer, ScorerError};

pub struct ScoringHarness {
    scorer: Arc<dyn Scorer>,
    timeout: Duration,
}

impl ScoringHarness {
    pub fn new(scorer: Arc<dyn Scorer>, timeout: Duration) -> Self {
        Self { scorer, timeout }
    }

    pub fn scorer_version(&self) -> &str {
        self.scorer.version()
    }

    /// Score all snapshots concurrently. Output order matches input order.
    pub async fn score_all(
        &self,
        request_id: &RequestId,
        snapshots: &[FeatureSnapshot],
        config: &PersonalizationConfig,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Vec<ModelScoreRecord> {
        join_all(
            snapshots
                .iter()
                .map(|snapshot| self.score_one(request_id, snapshot, config, cancel, now)),
        )
        .await
    }

    async fn score_one(
        &self,
        request_id: &RequestId,
        snapshot: &FeatureSnapshot,
        config: &PersonalizationConfig,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> ModelScoreRecord {
        let result = match &snapshot.features {
            None => Err(None),
            Some(_) if cancel.is_cancelled() => Err(Some(ScorerError::Cancelled)),
            Some(features) => {
                let request = ScoreRequest {
                    task_id: &snapshot.task.task_id,
                    features,
                };
                self.invoke(request, cancel).await.map_err(Some)
            }
        };

        let (outcome, output, error) = match result {
            Ok(output) => (ScoreOutcome::Scored, Some(output), None),
            Err(None) => (ScoreOutcome::Skipped, None, Some("no features".to_string())),
            Err(Some(e)) => {
                warn!(
                    task_id = %snapshot.task.task_id,
                    scorer = self.scorer.version(),
                    error = %e,
                    kind = e.error_kind(),
                    "scorer failed, candidate falls back to deterministic"
                );
                let outcome = match e {
                    ScorerError::Unavailable(_) => ScoreOutcome::Failed,
                    ScorerError::Timeout(_) => ScoreOutcome::TimedOut,
                    ScorerError::InvalidOutput(_) => ScoreOutcome::InvalidOutput,
                    ScorerError::Cancelled => ScoreOutcome::Cancelled,
                };
                (outcome, None, Some(e.to_string()))
            }
        };

        let confidence = output.as_ref().map_or(0.0, |o| o.confidence);
        ModelScoreRecord {
            id: ScoreId::new(),
            request_id: request_id.clone(),
            snapshot_id: snapshot.id.clone(),
            task_id: snapshot.task.task_id.clone(),
            scorer_version: self.scorer.version().to_string(),
            outcome,
            score: output.as_ref().map(|o| o.score),
            confidence,
            predicted: output.and_then(|o| o.predicted),
            threshold: config.confidence_threshold,
            eligible: outcome == ScoreOutcome::Scored && confidence >= config.confidence_threshold,
            mode: config.mode,
            error,
            recorded_at: now,
        }
    }

    async fn invoke(&self, request: ScoreRequest<'_>, cancel: &CancellationToken) -> Result<ScoreOutput, ScorerError> {
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ScorerError::Cancelled),
            res = tokio::time::timeout(self.timeout, AssertUnwindSafe(self.scorer.score(request)).catch_unwind()) => {
                res.map_err(|_| ScorerError::Timeout(self.timeout))?
                    .map_err(|payload| ScorerError::Unavailable(format!("scorer panicked: {}", panic_message(&*payload))))??
            }
        };
        output.validate()?;
        Ok(output)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockResponse, MockScorer};
    use chrono::TimeZone;
    use vigil_core::{PersonalizationMode, TaskSnapshot, TaskStatus};
    use vigil_policy::extract_features;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn snapshot(id: &str) -> FeatureSnapshot {
        let task = TaskSnapshot::new(id, TaskStatus::Open).with_due_at("2026-03-02T11:00:00Z");
        let features = extract_features(&task, now()).map_err(|e| e.to_string());
        FeatureSnapshot::capture(RequestId::from_raw("req_1"), task, now(), features)
    }

    fn config(mode: PersonalizationMode) -> PersonalizationConfig {
        PersonalizationConfig {
            mode,
            ..PersonalizationConfig::baseline(0.6, now())
        }
    }

    fn harness(scorer: MockScorer) -> ScoringHarness {
        ScoringHarness::new(Arc::new(scorer), Duration::from_millis(250))
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_degrades_only_the_slow_candidate() {
        let h = harness(
            MockScorer::new(MockResponse::score(1.0, 0.9))
                .with("slow", MockResponse::Hang),
        );
        let snaps = vec![snapshot("fast"), snapshot("slow")];
        let records = h
            .score_all(&RequestId::from_raw("req_1"), &snaps, &config(PersonalizationMode::Bounded), &CancellationToken::new(), now())
            .await;
        assert_eq!(records[0].outcome, ScoreOutcome::Scored);
        assert!(records[0].eligible);
        assert_eq!(records[1].outcome, ScoreOutcome::TimedOut);
        assert_eq!(records[1].confidence, 0.0);
        assert!(!records[1].eligible);
    }

    #[tokio::test]
    async fn low_confidence_is_recorded_but_ineligible() {
        let h = harness(MockScorer::new(MockResponse::score(3.0, 0.4)));
        let records = h
            .score_all(&RequestId::new(), &[snapshot("T1")], &config(PersonalizationMode::Shadow), &CancellationToken::new(), now())
            .await;
        assert_eq!(records[0].outcome, ScoreOutcome::Scored);
        assert_eq!(records[0].score, Some(3.0));
        assert!(!records[0].eligible);
        assert_eq!(records[0].mode, PersonalizationMode::Shadow);
    }

    #[tokio::test]
    async fn invalid_and_failed_outputs_become_zero_confidence() {
        let h = harness(
            MockScorer::new(MockResponse::score(f64::INFINITY, 0.9))
                .with("down", MockResponse::Fail("offline".into())),
        );
        let records = h
            .score_all(&RequestId::new(), &[snapshot("inf"), snapshot("down")], &config(PersonalizationMode::Bounded), &CancellationToken::new(), now())
            .await;
        assert_eq!(records[0].outcome, ScoreOutcome::InvalidOutput);
        assert_eq!(records[0].score, None);
        assert_eq!(records[1].outcome, ScoreOutcome::Failed);
        assert!(records[1].error.as_deref().unwrap().contains("offline"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_is_observed_by_inflight_calls() {
        let h = harness(MockScorer::new(MockResponse::Delay(
            Duration::from_millis(100),
            Box::new(MockResponse::score(1.0, 0.9)),
        )));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let records = h
            .score_all(&RequestId::new(), &[snapshot("T1")], &config(PersonalizationMode::Bounded), &cancel, now())
            .await;
        assert_eq!(records[0].outcome, ScoreOutcome::Cancelled);
    }

    struct Panicking;

    #[async_trait::async_trait]
    impl Scorer for Panicking {
        fn version(&self) -> &str {
            "panicking-v0"
        }

        async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScorerError> {
            if request.task_id.as_str() == "bad" {
                panic!("scorer bug");
            }
            Ok(ScoreOutput::new(2.0, 0.9))
        }
    }

    #[tokio::test]
    async fn panicking_scorer_fails_only_its_candidate() {
        let h = ScoringHarness::new(Arc::new(Panicking), Duration::from_millis(250));
        let records = h
            .score_all(&RequestId::new(), &[snapshot("good"), snapshot("bad")], &config(PersonalizationMode::Bounded), &CancellationToken::new(), now())
            .await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, ScoreOutcome::Scored);
        assert!(records[0].eligible);
        assert_eq!(records[1].outcome, ScoreOutcome::Failed);
        assert_eq!(records[1].confidence, 0.0);
        assert!(records[1].error.as_deref().unwrap().contains("scorer bug"));
    }

    #[tokio::test]
    async fn missing_features_skip_the_scorer() {
        let scorer = Arc::new(MockScorer::new(MockResponse::score(1.0, 0.9)));
        let h = ScoringHarness::new(scorer.clone(), Duration::from_millis(250));
        let task = TaskSnapshot::new("bad", TaskStatus::Open).with_due_at("nope");
        let snap = FeatureSnapshot::capture(RequestId::new(), task, now(), Err("invalid timestamp".into()));
        let records = h
            .score_all(&RequestId::new(), &[snap], &config(PersonalizationMode::Bounded), &CancellationToken::new(), now())
            .await;
        assert_eq!(records[0].outcome, ScoreOutcome::Skipped);
        assert_eq!(scorer.call_count(), 0);
    }
}
