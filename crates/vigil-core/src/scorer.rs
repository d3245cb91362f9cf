use std::time::Duration;

use async_trait::async_trait;

use crate::features::FeatureVector;
use crate::ids::TaskId;
use crate::records::TargetScores;

/// What a scorer sees for one candidate.
#[derive(Clone, Copy, Debug)]
pub struct ScoreRequest<'a> {
    pub task_id: &'a TaskId,
    pub features: &'a FeatureVector,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoreOutput {
    pub score: f64,
    /// Expected in [0, 1].
    pub confidence: f64,
    pub predicted: Option<TargetScores>,
}

impl ScoreOutput {
    pub fn new(score: f64, confidence: f64) -> Self {
        Self {
            score,
            confidence,
            predicted: None,
        }
    }

    /// Reject outputs that must not reach the composer.
    pub fn validate(&self) -> Result<(), ScorerError> {
        if !self.score.is_finite() {
            return Err(ScorerError::InvalidOutput(format!("score {} is not finite", self.score)));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(ScorerError::InvalidOutput(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// Failures a scorer may report. All of them are recovered by the scoring
/// harness; none reach a ranking caller.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("scorer unavailable: {0}")]
    Unavailable(String),
    #[error("scorer timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid scorer output: {0}")]
    InvalidOutput(String),
    #[error("cancelled")]
    Cancelled,
}

impl ScorerError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Timeout(_) => "timeout",
            Self::InvalidOutput(_) => "invalid_output",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Pluggable learned scoring capability: features in, score and confidence out.
#[async_trait]
pub trait Scorer: Send + Sync {
    fn version(&self) -> &str;

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScorerError>;
}
