//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::VigilSettings;

/// `$VIGIL_HOME`, falling back to `~/.vigil`.
pub fn vigil_home() -> PathBuf {
    if let Some(home) = std::env::var("VIGIL_HOME").ok().filter(|v| !v.is_empty()) {
        return PathBuf::from(home);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".vigil")
}

pub fn settings_path() -> PathBuf {
    vigil_home().join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<VigilSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// validation are errors.
pub fn load_settings_from_path(path: &Path) -> Result<VigilSettings> {
    let defaults = serde_json::to_value(VigilSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: VigilSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate().map_err(SettingsError::InvalidValue)?;
    Ok(settings)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `VIGIL_*` environment overrides. Invalid values are ignored with a
/// warning.
pub fn apply_env_overrides(settings: &mut VigilSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Same as [`apply_env_overrides`] with an injectable lookup.
pub fn apply_overrides_from<F>(settings: &mut VigilSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Storage & logging ───────────────────────────────────────────
    if let Some(v) = env.string("VIGIL_HISTORY_DB") {
        settings.storage.history_db_path = v;
    }
    if let Some(v) = env.string("VIGIL_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("VIGIL_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Scoring & feedback ──────────────────────────────────────────
    if let Some(v) = env.u64("VIGIL_SCORING_TIMEOUT_MS", 1, 60_000) {
        settings.scoring.timeout_ms = v;
    }
    if let Some(v) = env.u64("VIGIL_FOLLOWUP_WINDOW_MINUTES", 1, 1440) {
        settings.feedback.followup_window_minutes = v as i64;
    }
    if let Some(v) = env.u64("VIGIL_SHORT_SNOOZE_MINUTES", 1, 1440) {
        settings.feedback.short_snooze_minutes = v as i64;
    }

    // ── Personalization & replay ────────────────────────────────────
    if let Some(v) = env.f64("VIGIL_CONFIDENCE_THRESHOLD", 0.0, 1.0) {
        settings.personalization.default_confidence_threshold = v;
    }
    if let Some(v) = env.string("VIGIL_INITIAL_MODE") {
        match v.parse() {
            Ok(mode) => settings.personalization.initial_mode = mode,
            Err(e) => tracing::warn!(key = "VIGIL_INITIAL_MODE", error = %e, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = env.u64("VIGIL_REPLAY_WINDOW_DAYS", 1, 365) {
        settings.replay.window_days = v as u32;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.parse().ok()?;
    (n.is_finite() && n >= min && n <= max).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn f64(&self, name: &str, min: f64, max: f64) -> Option<f64> {
        let val = (self.lookup)(name)?;
        let result = parse_f64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid f64 env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use vigil_core::PersonalizationMode;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"policy": {"dueSoonHours": 72, "reminderAdvanceHours": 24}});
        let source = serde_json::json!({"policy": {"dueSoonHours": 48}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["policy"]["dueSoonHours"], 48);
        assert_eq!(merged["policy"]["reminderAdvanceHours"], 24);
    }

    #[test]
    fn merge_skips_null() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_replaces_arrays() {
        let merged = deep_merge(serde_json::json!({"a": [1, 2]}), serde_json::json!({"a": [3]}));
        assert_eq!(merged["a"], serde_json::json!([3]));
    }

    // ── file loading ────────────────────────────────────────────────

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.policy, VigilSettings::default().policy);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"replay": {"minShadowRecords": 3}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.replay.min_shadow_records, 3);
        assert_eq!(settings.replay.max_ordering_shift_rate, 0.4);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_settings_from_path(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"policy": {"overdueRenotifyHours": 0}}"#).unwrap();
        assert!(matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = VigilSettings::default();
        apply_overrides_from(
            &mut s,
            lookup(&[
                ("VIGIL_SCORING_TIMEOUT_MS", "500"),
                ("VIGIL_CONFIDENCE_THRESHOLD", "0.7"),
                ("VIGIL_INITIAL_MODE", "shadow"),
                ("VIGIL_LOG_JSON", "yes"),
            ]),
        );
        assert_eq!(s.scoring.timeout_ms, 500);
        assert_eq!(s.personalization.default_confidence_threshold, 0.7);
        assert_eq!(s.personalization.initial_mode, PersonalizationMode::Shadow);
        assert!(s.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = VigilSettings::default();
        apply_overrides_from(
            &mut s,
            lookup(&[
                ("VIGIL_SCORING_TIMEOUT_MS", "0"),
                ("VIGIL_CONFIDENCE_THRESHOLD", "1.5"),
                ("VIGIL_INITIAL_MODE", "yolo"),
            ]),
        );
        assert_eq!(s, VigilSettings::default());
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_u64_range("10", 1, 5), None);
        assert_eq!(parse_f64_range("NaN", 0.0, 1.0), None);
        assert_eq!(parse_f64_range("0.25", 0.0, 1.0), Some(0.25));
    }
}
