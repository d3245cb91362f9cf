use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalizationMode {
    DeterministicOnly,
    Shadow,
    Bounded,
}

impl PersonalizationMode {
    pub const ALL: [PersonalizationMode; 3] = [Self::DeterministicOnly, Self::Shadow, Self::Bounded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeterministicOnly => "deterministic_only",
            Self::Shadow => "shadow",
            Self::Bounded => "bounded",
        }
    }
}

impl fmt::Display for PersonalizationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PersonalizationMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|m| m.as_str() == s)
            .copied()
            .ok_or_else(|| {
                format!("unknown mode '{s}'; expected one of deterministic_only, shadow, bounded")
            })
    }
}

/// The single mutable control entity. Only the mode controller replaces it,
/// and only whole.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersonalizationConfig {
    pub version: u64,
    pub mode: PersonalizationMode,
    pub confidence_threshold: f64,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl PersonalizationConfig {
    pub fn baseline(confidence_threshold: f64, at: DateTime<Utc>) -> Self {
        Self {
            version: 0,
            mode: PersonalizationMode::DeterministicOnly,
            confidence_threshold,
            updated_at: at,
            updated_by: "system".into(),
        }
    }

    /// Scores are recorded for offline analysis.
    pub fn shadow_scoring_enabled(&self) -> bool {
        self.mode != PersonalizationMode::DeterministicOnly
    }

    /// Eligible scores may reorder candidates within their bucket.
    pub fn bounded_enabled(&self) -> bool {
        self.mode == PersonalizationMode::Bounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parse_rejects_unknown() {
        let err = "aggressive".parse::<PersonalizationMode>().unwrap_err();
        assert!(err.contains("aggressive"));
        assert!(err.contains("bounded"));
    }

    #[test]
    fn mode_string_roundtrip() {
        for mode in PersonalizationMode::ALL {
            assert_eq!(mode.as_str().parse::<PersonalizationMode>().unwrap(), mode);
        }
    }

    #[test]
    fn derived_flags() {
        let mut config = PersonalizationConfig::baseline(0.6, Utc::now());
        assert!(!config.shadow_scoring_enabled());
        assert!(!config.bounded_enabled());

        config.mode = PersonalizationMode::Shadow;
        assert!(config.shadow_scoring_enabled());
        assert!(!config.bounded_enabled());

        config.mode = PersonalizationMode::Bounded;
        assert!(config.shadow_scoring_enabled());
        assert!(config.bounded_enabled());
    }
}
