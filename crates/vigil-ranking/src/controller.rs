//! Owner of the single live [`PersonalizationConfig`].
//!
//! Readers take a cheap snapshot under a read lock and always see a fully
//! applied value. Writers are serialized by an async mutex, write their
//! audit event first, then swap the whole value.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use vigil_core::ids::EventId;
use vigil_core::records::{ConfigAudit, ControlCommand};
use vigil_core::{HistoryEvent, HistoryKind, PersonalizationConfig, PersonalizationMode};
use vigil_settings::PersonalizationSettings;
use vigil_store::{HistoryQuery, HistoryStore, StoreError};

use crate::error::{ConfigValidationError, ControlError};

/// A requested change. Absent fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlUpdate {
    pub actor: String,
    pub rationale: String,
    pub mode: Option<String>,
    pub confidence_threshold: Option<f64>,
}

impl ControlUpdate {
    /// Validate against allowed ranges and enumerations.
    pub fn validate(&self) -> Result<(Option<PersonalizationMode>, Option<f64>), ConfigValidationError> {
        if self.actor.trim().is_empty() {
            return Err(ConfigValidationError::new("actor", "must not be empty"));
        }
        if self.rationale.trim().is_empty() {
            return Err(ConfigValidationError::new("rationale", "must not be empty"));
        }
        let mode = self
            .mode
            .as_deref()
            .map(|m| m.trim().parse::<PersonalizationMode>())
            .transpose()
            .map_err(|e| ConfigValidationError::new("mode", e))?;
        if let Some(t) = self.confidence_threshold {
            if !t.is_finite() || !(0.0..=1.0).contains(&t) {
                return Err(ConfigValidationError::new(
                    "confidence_threshold",
                    format!("{t} is outside [0, 1]"),
                ));
            }
        }
        if mode.is_none() && self.confidence_threshold.is_none() {
            return Err(ConfigValidationError::new("update", "no changes requested"));
        }
        Ok((mode, self.confidence_threshold))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub config: PersonalizationConfig,
    /// False when the audit event could not be written. The rollback still
    /// took effect.
    pub audit_persisted: bool,
}

pub struct ModeController {
    current: RwLock<PersonalizationConfig>,
    writer: Mutex<()>,
    history: Arc<dyn HistoryStore>,
    baseline_threshold: f64,
}

impl ModeController {
    pub fn new(history: Arc<dyn HistoryStore>, initial: PersonalizationConfig, baseline_threshold: f64) -> Self {
        Self {
            current: RwLock::new(initial),
            writer: Mutex::new(()),
            history,
            baseline_threshold,
        }
    }

    /// Rebuild the live config from the audit trail. With no audit events
    /// the configured initial mode and default threshold apply.
    pub fn restore(
        history: Arc<dyn HistoryStore>,
        settings: &PersonalizationSettings,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let latest = history
            .query(&HistoryQuery::kind(HistoryKind::ConfigChanged).newest_first().limit(1))?
            .into_iter()
            .find_map(|entry| match entry.event {
                HistoryEvent::ConfigChanged(audit) => Some(audit.after),
                _ => None,
            });
        let initial = latest.unwrap_or_else(|| PersonalizationConfig {
            mode: settings.initial_mode,
            ..PersonalizationConfig::baseline(settings.default_confidence_threshold, now)
        });
        info!(mode = %initial.mode, version = initial.version, "personalization config restored");
        Ok(Self::new(history, initial, settings.default_confidence_threshold))
    }

    pub fn current(&self) -> PersonalizationConfig {
        self.current.read().clone()
    }

    pub async fn apply(&self, update: ControlUpdate, now: DateTime<Utc>) -> Result<PersonalizationConfig, ControlError> {
        self.apply_checked(None, update, now).await
    }

    /// Apply `update` only if the live version is still `expected_version`.
    /// The check and the swap happen under the same writer lock.
    pub async fn apply_if_version(
        &self,
        expected_version: u64,
        update: ControlUpdate,
        now: DateTime<Utc>,
    ) -> Result<PersonalizationConfig, ControlError> {
        self.apply_checked(Some(expected_version), update, now).await
    }

    async fn apply_checked(
        &self,
        expected_version: Option<u64>,
        update: ControlUpdate,
        now: DateTime<Utc>,
    ) -> Result<PersonalizationConfig, ControlError> {
        let (mode, threshold) = update.validate().inspect_err(|e| {
            warn!(actor = %update.actor, field = e.field, reason = %e.reason, "control update rejected");
        })?;

        let _guard = self.writer.lock().await;
        let before = self.current();
        if let Some(expected) = expected_version.filter(|v| *v != before.version) {
            warn!(actor = %update.actor, expected, actual = before.version, "conditional update lost to a newer config");
            return Err(ControlError::VersionConflict {
                expected,
                actual: before.version,
            });
        }
        let after = PersonalizationConfig {
            version: before.version + 1,
            mode: mode.unwrap_or(before.mode),
            confidence_threshold: threshold.unwrap_or(before.confidence_threshold),
            updated_at: now,
            updated_by: update.actor.clone(),
        };
        let audit = ConfigAudit {
            id: EventId::new(),
            command: ControlCommand::Update,
            actor: update.actor,
            rationale: update.rationale,
            before,
            after: after.clone(),
            at: now,
        };
        let _ = self.history.append(HistoryEvent::ConfigChanged(audit))?;
        *self.current.write() = after.clone();
        info!(mode = %after.mode, threshold = after.confidence_threshold, version = after.version, "personalization config updated");
        Ok(after)
    }

    /// Return to deterministic-only ordering. Never fails.
    pub async fn rollback(&self, actor: &str, rationale: &str, now: DateTime<Utc>) -> RollbackOutcome {
        let _guard = self.writer.lock().await;
        let before = self.current();
        let after = PersonalizationConfig {
            version: before.version + 1,
            mode: PersonalizationMode::DeterministicOnly,
            confidence_threshold: self.baseline_threshold,
            updated_at: now,
            updated_by: actor.to_string(),
        };
        let audit = ConfigAudit {
            id: EventId::new(),
            command: ControlCommand::Rollback,
            actor: actor.to_string(),
            rationale: rationale.to_string(),
            before,
            after: after.clone(),
            at: now,
        };
        let audit_persisted = match self.history.append(HistoryEvent::ConfigChanged(audit)) {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, actor, "rollback audit write failed; rolling back anyway");
                false
            }
        };
        *self.current.write() = after.clone();
        info!(actor, version = after.version, "rolled back to deterministic ordering");
        RollbackOutcome {
            config: after,
            audit_persisted,
        }
    }
}
