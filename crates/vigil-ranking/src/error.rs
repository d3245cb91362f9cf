use vigil_store::StoreError;

/// A rejected control update. Values are never clamped.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ConfigValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ConfigValidationError),
    /// The audit event could not be written; the config was not changed.
    #[error("audit write failed: {0}")]
    Audit(#[from] StoreError),
    /// A conditional update found a different live version.
    #[error("config version is {actual}, expected {expected}")]
    VersionConflict { expected: u64, actual: u64 },
}

impl ControlError {
    /// Stable machine-checkable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "invalid_config",
            Self::Audit(_) => "audit_unavailable",
            Self::VersionConflict { .. } => "version_conflict",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AttentionError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("ranking request cancelled")]
    Cancelled,
    #[error("history unavailable: {0}")]
    History(#[from] StoreError),
}

impl AttentionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Cancelled => "cancelled",
            Self::History(_) => "history_unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_names_field() {
        let err = ControlError::from(ConfigValidationError::new("mode", "unknown mode 'x'"));
        assert_eq!(err.to_string(), "invalid mode: unknown mode 'x'");
        assert_eq!(err.code(), "invalid_config");
    }

    #[test]
    fn attention_codes() {
        assert_eq!(AttentionError::NotFound("T9".into()).code(), "not_found");
        assert_eq!(AttentionError::Cancelled.code(), "cancelled");
        assert_eq!(AttentionError::from(StoreError::Database("locked".into())).code(), "history_unavailable");
    }
}
