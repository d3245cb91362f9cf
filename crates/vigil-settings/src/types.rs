//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the fields it overrides.

use serde::{Deserialize, Serialize};
use vigil_core::PersonalizationMode;

/// Root settings type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
    pub policy: PolicySettings,
    pub feedback: FeedbackSettings,
    pub scoring: ScoringSettings,
    pub personalization: PersonalizationSettings,
    pub replay: ReplaySettings,
    pub views: ViewSettings,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// History database path. Empty means `<vigil home>/history.db`.
    pub history_db_path: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Deterministic policy knobs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicySettings {
    /// Tasks due within this many hours land in `urgent_due_soon`.
    pub due_soon_hours: u32,
    /// A `due_soon` reminder fires this many hours before the due time.
    pub reminder_advance_hours: u32,
    /// Length of one `overdue` reminder window.
    pub overdue_renotify_hours: u32,
    /// First UTC hour (inclusive) reminders may be delivered.
    pub reminder_window_start_hour: u32,
    /// Last UTC hour (inclusive) reminders may be delivered.
    pub reminder_window_end_hour: u32,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            due_soon_hours: 72,
            reminder_advance_hours: 24,
            overdue_renotify_hours: 24,
            reminder_window_start_hour: 8,
            reminder_window_end_hour: 21,
        }
    }
}

/// Longest accepted feedback window (30 days).
pub const MAX_WINDOW_MINUTES: i64 = 43_200;
/// Most context events kept per interpreted action.
pub const MAX_CONTEXT_EVENTS: usize = 10_000;

/// Feedback interpretation thresholds. These are operational defaults,
/// not derived from a model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedbackSettings {
    pub followup_window_minutes: i64,
    pub short_snooze_minutes: i64,
    pub context_lookback_minutes: i64,
    pub max_context_events: usize,
}

impl Default for FeedbackSettings {
    fn default() -> Self {
        Self {
            followup_window_minutes: 60,
            short_snooze_minutes: 15,
            context_lookback_minutes: 1440,
            max_context_events: 50,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringSettings {
    /// Per-candidate scorer budget.
    pub timeout_ms: u64,
}

impl Default for ScoringSettings {
    fn default() -> Self {
        Self { timeout_ms: 250 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonalizationSettings {
    /// Mode used when the audit trail is empty.
    pub initial_mode: PersonalizationMode,
    /// Threshold used when the audit trail is empty and after rollback.
    pub default_confidence_threshold: f64,
    /// Lowest threshold an experiment may be applied with.
    pub threshold_floor: f64,
}

impl Default for PersonalizationSettings {
    fn default() -> Self {
        Self {
            initial_mode: PersonalizationMode::DeterministicOnly,
            default_confidence_threshold: 0.6,
            threshold_floor: 0.4,
        }
    }
}

/// Replay gate thresholds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplaySettings {
    pub max_duplicate_reminder_rate: f64,
    pub max_ordering_shift_rate: f64,
    pub min_shadow_records: u32,
    pub max_calibration_gap: f64,
    pub window_days: u32,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self {
            max_duplicate_reminder_rate: 0.05,
            max_ordering_shift_rate: 0.4,
            min_shadow_records: 10,
            max_calibration_gap: 0.25,
            window_days: 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ViewSettings {
    pub current_limit: usize,
    pub upcoming_horizon_hours: u32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            current_limit: 5,
            upcoming_horizon_hours: 168,
        }
    }
}

impl VigilSettings {
    /// Cross-field checks serde cannot express.
    pub fn validate(&self) -> Result<(), String> {
        let p = &self.policy;
        if p.reminder_window_start_hour > 23 || p.reminder_window_end_hour > 23 {
            return Err("reminder window hours must be within 0..=23".into());
        }
        if p.reminder_window_start_hour > p.reminder_window_end_hour {
            return Err("reminderWindowStartHour must not exceed reminderWindowEndHour".into());
        }
        if p.overdue_renotify_hours == 0 {
            return Err("overdueRenotifyHours must be positive".into());
        }
        let t = self.personalization.default_confidence_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(format!("defaultConfidenceThreshold {t} outside [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.personalization.threshold_floor) {
            return Err("thresholdFloor outside [0, 1]".into());
        }
        let f = &self.feedback;
        for (name, minutes) in [
            ("followupWindowMinutes", f.followup_window_minutes),
            ("shortSnoozeMinutes", f.short_snooze_minutes),
            ("contextLookbackMinutes", f.context_lookback_minutes),
        ] {
            if !(1..=MAX_WINDOW_MINUTES).contains(&minutes) {
                return Err(format!("{name} {minutes} outside 1..={MAX_WINDOW_MINUTES}"));
            }
        }
        if !(1..=MAX_CONTEXT_EVENTS).contains(&f.max_context_events) {
            return Err(format!(
                "maxContextEvents {} outside 1..={MAX_CONTEXT_EVENTS}",
                f.max_context_events
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_operational_policy() {
        let s = VigilSettings::default();
        assert_eq!(s.policy.reminder_window_start_hour, 8);
        assert_eq!(s.policy.reminder_window_end_hour, 21);
        assert_eq!(s.feedback.followup_window_minutes, 60);
        assert_eq!(s.feedback.short_snooze_minutes, 15);
        assert_eq!(s.personalization.default_confidence_threshold, 0.6);
        assert_eq!(s.personalization.initial_mode, PersonalizationMode::DeterministicOnly);
        assert_eq!(s.replay.max_duplicate_reminder_rate, 0.05);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn camel_case_wire_format() {
        let json = serde_json::to_value(VigilSettings::default()).unwrap();
        assert_eq!(json["policy"]["dueSoonHours"], 72);
        assert_eq!(json["personalization"]["initialMode"], "deterministic_only");
        assert_eq!(json["scoring"]["timeoutMs"], 250);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: VigilSettings =
            serde_json::from_str(r#"{"feedback": {"shortSnoozeMinutes": 10}}"#).unwrap();
        assert_eq!(s.feedback.short_snooze_minutes, 10);
        assert_eq!(s.feedback.followup_window_minutes, 60);
        assert_eq!(s.views.current_limit, 5);
    }

    #[test]
    fn validate_rejects_inverted_window() {
        let mut s = VigilSettings::default();
        s.policy.reminder_window_start_hour = 22;
        s.policy.reminder_window_end_hour = 8;
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_threshold_out_of_range() {
        let mut s = VigilSettings::default();
        s.personalization.default_confidence_threshold = 1.5;
        assert!(s.validate().unwrap_err().contains("1.5"));
    }

    #[test]
    fn validate_bounds_feedback_windows() {
        let mut s = VigilSettings::default();
        s.feedback.context_lookback_minutes = i64::MAX;
        assert!(s.validate().unwrap_err().contains("contextLookbackMinutes"));

        let mut s = VigilSettings::default();
        s.feedback.max_context_events = 0;
        assert!(s.validate().unwrap_err().contains("maxContextEvents"));

        let mut s = VigilSettings::default();
        s.feedback.max_context_events = MAX_CONTEXT_EVENTS + 1;
        assert!(s.validate().is_err());

        let mut s = VigilSettings::default();
        s.feedback.followup_window_minutes = 0;
        assert!(s.validate().unwrap_err().contains("followupWindowMinutes"));

        let mut s = VigilSettings::default();
        s.feedback.context_lookback_minutes = MAX_WINDOW_MINUTES;
        assert!(s.validate().is_ok());
    }
}
