//! Built-in scorers.

use async_trait::async_trait;

use vigil_core::records::TargetScores;
use vigil_core::{FeatureVector, ScoreOutput, ScoreRequest, Scorer, ScorerError};

/// Always answers with zero confidence, so nothing it says is ever applied.
#[derive(Clone, Debug, Default)]
pub struct NullScorer;

#[async_trait]
impl Scorer for NullScorer {
    fn version(&self) -> &str {
        "null-v1"
    }

    async fn score(&self, _request: ScoreRequest<'_>) -> Result<ScoreOutput, ScorerError> {
        Ok(ScoreOutput::new(0.0, 0.0))
    }
}

/// Interpretable linear model over the feature vector.
///
/// Weights favour priority and due proximity, reward staleness up to two
/// weeks, and penalise blocked or gated work. Confidence grows with how
/// much of the vector is informative.
#[derive(Clone, Debug, Default)]
pub struct LinearScorer;

impl LinearScorer {
    pub const VERSION: &'static str = "linear-v1";

    pub fn raw_score(f: &FeatureVector) -> f64 {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        18.0 * f.priority_value
            + 14.0 * flag(f.overdue)
            + 9.0 * flag(f.due_in_24h)
            + 6.0 * flag(f.due_in_72h)
            + 4.0 * (f.age_hours / 24.0).min(14.0)
            - 8.0 * flag(f.is_blocked)
            - 6.0 * flag(f.has_future_start_gate)
    }

    pub fn confidence(f: &FeatureVector) -> f64 {
        let mut c: f64 = 0.55;
        if f.has_due() {
            c += 0.15;
        }
        if f.priority_value >= 0.75 {
            c += 0.1;
        }
        if f.age_hours > 72.0 {
            c += 0.1;
        }
        c.clamp(0.05, 0.99)
    }

    fn predicted(f: &FeatureVector) -> TargetScores {
        let urgency = if f.overdue || f.due_in_24h {
            0.9
        } else if f.due_in_72h {
            0.7
        } else {
            0.5
        };
        let usefulness = (0.4 + 0.5 * f.priority_value).min(1.0);
        let timing_fit = if f.is_actionable() { urgency } else { 0.2 };
        let interrupt_cost = if f.is_actionable() { 1.0 - urgency * 0.6 } else { 0.8 };
        TargetScores::new(usefulness, timing_fit, interrupt_cost)
    }
}

#[async_trait]
impl Scorer for LinearScorer {
    fn version(&self) -> &str {
        Self::VERSION
    }

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScorerError> {
        let f = request.features;
        Ok(ScoreOutput {
            score: Self::raw_score(f),
            confidence: Self::confidence(f),
            predicted: Some(Self::predicted(f)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::ids::TaskId;
    use vigil_core::{TaskPriority, TaskStatus};

    fn features(priority: TaskPriority) -> FeatureVector {
        FeatureVector {
            status: TaskStatus::Open,
            priority,
            priority_value: vigil_core::features::priority_value(priority),
            due_epoch: None,
            hours_to_due: None,
            overdue: false,
            due_in_24h: false,
            due_in_72h: false,
            due_in_week: false,
            age_hours: 0.0,
            is_blocked: false,
            is_snoozed: false,
            has_future_start_gate: false,
            blocked_by_count: 0,
        }
    }

    #[tokio::test]
    async fn null_scorer_has_zero_confidence() {
        let f = features(TaskPriority::P0);
        let out = NullScorer
            .score(ScoreRequest { task_id: &TaskId::from_raw("T1"), features: &f })
            .await
            .unwrap();
        assert_eq!(out.confidence, 0.0);
    }

    #[tokio::test]
    async fn linear_scorer_output_is_valid() {
        let mut f = features(TaskPriority::P1);
        f.due_epoch = Some(0);
        f.hours_to_due = Some(2.0);
        f.due_in_24h = true;
        f.due_in_72h = true;
        let out = LinearScorer
            .score(ScoreRequest { task_id: &TaskId::from_raw("T1"), features: &f })
            .await
            .unwrap();
        out.validate().unwrap();
        assert_eq!(out.score, 18.0 * 0.75 + 9.0 + 6.0);
        assert!((out.confidence - 0.8).abs() < 1e-9);
        assert!(out.predicted.is_some());
    }

    #[test]
    fn confidence_grows_with_evidence() {
        let bare = features(TaskPriority::P3);
        assert!((LinearScorer::confidence(&bare) - 0.55).abs() < 1e-9);

        let mut full = features(TaskPriority::P0);
        full.due_epoch = Some(0);
        full.age_hours = 100.0;
        let c = LinearScorer::confidence(&full);
        assert!((c - 0.9).abs() < 1e-9);
        assert!((0.05..=0.99).contains(&c));
    }

    #[test]
    fn higher_priority_scores_higher() {
        assert!(LinearScorer::raw_score(&features(TaskPriority::P0)) > LinearScorer::raw_score(&features(TaskPriority::P3)));
    }

    #[test]
    fn staleness_is_capped() {
        let mut a = features(TaskPriority::P2);
        let mut b = a.clone();
        a.age_hours = 24.0 * 14.0;
        b.age_hours = 24.0 * 60.0;
        assert_eq!(LinearScorer::raw_score(&a), LinearScorer::raw_score(&b));
    }
}
