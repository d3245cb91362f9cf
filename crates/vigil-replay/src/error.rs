use chrono::{DateTime, Utc};

use vigil_ranking::{ConfigValidationError, ControlError};
use vigil_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("replay window is empty: {start} is after {end}")]
    InvalidWindow { start: DateTime<Utc>, end: DateTime<Utc> },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ReplayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidWindow { .. } => "invalid_window",
            Self::Store(_) => "history_unavailable",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LabError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    #[error("experiment run not found: {0}")]
    NotFound(String),
    /// Apply refused; nothing was changed.
    #[error("safety gate violation for {run_id}: {reason}")]
    SafetyGateViolation { run_id: String, reason: String },
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LabError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_request",
            Self::NotFound(_) => "not_found",
            Self::SafetyGateViolation { .. } => "safety_gate_violation",
            Self::Control(e) => e.code(),
            Self::Replay(e) => e.code(),
            Self::Store(_) => "history_unavailable",
        }
    }
}
