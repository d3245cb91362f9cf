/// Why a feature vector could not be computed. Never surfaced to ranking
/// callers: the policy engine degrades the candidate instead.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FeatureError {
    #[error("task id is empty")]
    MissingTaskId,
    #[error("unrecognised status")]
    UnknownStatus,
    #[error("unknown priority: {0}")]
    UnknownPriority(String),
    #[error("invalid timestamp in {field}: {value}")]
    InvalidTimestamp { field: &'static str, value: String },
}

impl FeatureError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::MissingTaskId => "missing_task_id",
            Self::UnknownStatus => "unknown_status",
            Self::UnknownPriority(_) => "unknown_priority",
            Self::InvalidTimestamp { .. } => "invalid_timestamp",
        }
    }
}
