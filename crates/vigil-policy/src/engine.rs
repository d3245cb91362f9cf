//! Deterministic policy: urgency, bucket, and reminder eligibility.
//!
//! Everything here is a pure function of a task snapshot (or its features)
//! and a logical time. The same inputs always produce the same decision,
//! which is what lets the replay evaluator reproduce historical rankings.

use std::cmp::Ordering;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use vigil_core::ids::TaskId;
use vigil_core::records::{FeatureSnapshot, UrgencyComponent};
use vigil_core::{
    DedupKey, FeatureVector, PriorityBucket, ReminderCondition, TaskPriority, TaskSnapshot,
};
use vigil_settings::PolicySettings;

use crate::features::extract_features;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReminderEligibility {
    pub eligible: bool,
    pub condition: Option<ReminderCondition>,
    pub dedup_key: Option<DedupKey>,
    pub reason: String,
}

impl ReminderEligibility {
    fn ineligible(reason: impl Into<String>) -> Self {
        Self {
            eligible: false,
            condition: None,
            dedup_key: None,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub task_id: TaskId,
    pub urgency_score: f64,
    pub components: Vec<UrgencyComponent>,
    pub bucket: PriorityBucket,
    /// p0 = 3 ... p3 = 0. Zero when degraded.
    pub priority_level: u8,
    pub due_epoch: Option<i64>,
    pub reminder: ReminderEligibility,
    pub degraded: bool,
    pub degraded_reason: Option<String>,
}

impl PolicyDecision {
    /// `"due within 24h +45, priority p1 +20"`.
    pub fn components_summary(&self) -> String {
        if self.components.is_empty() {
            return "no urgency factors".into();
        }
        self.components
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Clone, Debug)]
pub struct PolicyEngine {
    settings: PolicySettings,
}

impl PolicyEngine {
    pub fn new(settings: PolicySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PolicySettings {
        &self.settings
    }

    /// Extract features and decide. Never fails: malformed input degrades.
    pub fn evaluate(&self, task: &TaskSnapshot, now: DateTime<Utc>) -> PolicyDecision {
        match extract_features(task, now) {
            Ok(features) => self.decide(&task.task_id, &features, now),
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, kind = e.error_kind(), "feature extraction failed, degrading");
                Self::degraded(&task.task_id, format!("feature computation failed: {e}"))
            }
        }
    }

    /// Decide from a recorded snapshot, using the features captured with it.
    pub fn evaluate_snapshot(&self, snapshot: &FeatureSnapshot) -> PolicyDecision {
        match (&snapshot.features, &snapshot.feature_error) {
            (Some(features), _) => self.decide(&snapshot.task.task_id, features, snapshot.logical_time),
            (None, Some(e)) => Self::degraded(&snapshot.task.task_id, format!("feature computation failed: {e}")),
            (None, None) => Self::degraded(&snapshot.task.task_id, "snapshot has no features".to_string()),
        }
    }

    pub fn decide(&self, task_id: &TaskId, features: &FeatureVector, now: DateTime<Utc>) -> PolicyDecision {
        let (urgency_score, components) = urgency(features);
        PolicyDecision {
            task_id: task_id.clone(),
            urgency_score,
            components,
            bucket: self.bucket(features),
            priority_level: features.priority.level(),
            due_epoch: features.due_epoch,
            reminder: self.reminder(task_id, features, now),
            degraded: false,
            degraded_reason: None,
        }
    }

    /// Lowest bucket, zero urgency, never reminded.
    pub fn degraded(task_id: &TaskId, reason: String) -> PolicyDecision {
        PolicyDecision {
            task_id: task_id.clone(),
            urgency_score: 0.0,
            components: Vec::new(),
            bucket: PriorityBucket::Unclassified,
            priority_level: 0,
            due_epoch: None,
            reminder: ReminderEligibility::ineligible("degraded input"),
            degraded: true,
            degraded_reason: Some(reason),
        }
    }

    /// Terminal, blocked and deferred states take precedence over due dates.
    pub fn bucket(&self, f: &FeatureVector) -> PriorityBucket {
        if f.is_terminal() {
            PriorityBucket::CompletedOrCancelled
        } else if f.is_blocked {
            PriorityBucket::Blocked
        } else if f.is_snoozed || f.has_future_start_gate {
            PriorityBucket::DeferredOrGated
        } else if f.overdue
            || f.hours_to_due.is_some_and(|h| h <= self.settings.due_soon_hours as f64)
        {
            PriorityBucket::UrgentDueSoon
        } else if matches!(f.priority, TaskPriority::P0 | TaskPriority::P1) {
            PriorityBucket::ReadyHighPriority
        } else {
            PriorityBucket::ReadyNormal
        }
    }

    pub fn reminder(&self, task_id: &TaskId, f: &FeatureVector, now: DateTime<Utc>) -> ReminderEligibility {
        if f.has_future_start_gate {
            return ReminderEligibility::ineligible("start gated");
        }
        if f.is_blocked {
            return ReminderEligibility::ineligible("blocked");
        }
        if !f.is_actionable() {
            return ReminderEligibility::ineligible(format!("not actionable ({})", f.status));
        }
        let (Some(hours), Some(due_epoch)) = (f.hours_to_due, f.due_epoch) else {
            return ReminderEligibility::ineligible("no due date");
        };

        let (condition, window, reason) = if f.overdue {
            let period_secs = i64::from(self.settings.overdue_renotify_hours.max(1)) * 3600;
            let period = now.timestamp().div_euclid(period_secs);
            (ReminderCondition::Overdue, format!("overdue@{period}"), "overdue".to_string())
        } else if hours <= self.settings.reminder_advance_hours as f64 {
            (
                ReminderCondition::DueSoon,
                format!("due@{due_epoch}"),
                format!("due within {}h", self.settings.reminder_advance_hours),
            )
        } else {
            return ReminderEligibility::ineligible("due beyond reminder horizon");
        };

        let dedup_key = DedupKey::new(task_id, condition, &window);
        let hour = now.hour();
        let in_window = (self.settings.reminder_window_start_hour..=self.settings.reminder_window_end_hour)
            .contains(&hour);
        if !in_window {
            return ReminderEligibility {
                eligible: false,
                condition: Some(condition),
                dedup_key: Some(dedup_key),
                reason: format!("outside delivery window ({hour:02}:00 UTC)"),
            };
        }

        ReminderEligibility {
            eligible: true,
            condition: Some(condition),
            dedup_key: Some(dedup_key),
            reason,
        }
    }
}

/// Additive urgency score with its itemised components.
pub fn urgency(f: &FeatureVector) -> (f64, Vec<UrgencyComponent>) {
    let mut components = Vec::new();

    if let Some(hours) = f.hours_to_due {
        let (label, points) = if f.overdue {
            ("overdue", 60.0)
        } else if hours <= 24.0 {
            ("due within 24h", 45.0)
        } else if hours <= 72.0 {
            ("due within 72h", 35.0)
        } else if hours <= 168.0 {
            ("due within 7d", 20.0)
        } else {
            ("due later", 5.0)
        };
        components.push(UrgencyComponent::new(label, points));
    }

    let priority_points = match f.priority {
        TaskPriority::P0 => 30.0,
        TaskPriority::P1 => 20.0,
        TaskPriority::P2 => 10.0,
        TaskPriority::P3 => 0.0,
    };
    if priority_points > 0.0 {
        components.push(UrgencyComponent::new(format!("priority {}", f.priority), priority_points));
    }

    if f.age_hours >= 14.0 * 24.0 {
        components.push(UrgencyComponent::new("stale 14d", 18.0));
    } else if f.age_hours >= 7.0 * 24.0 {
        components.push(UrgencyComponent::new("stale 7d", 12.0));
    } else if f.age_hours >= 3.0 * 24.0 {
        components.push(UrgencyComponent::new("stale 3d", 6.0));
    }

    if f.is_blocked {
        components.push(UrgencyComponent::new("blocked", -15.0));
    }
    if f.is_snoozed {
        components.push(UrgencyComponent::new("snoozed", -25.0));
    }
    if f.has_future_start_gate {
        components.push(UrgencyComponent::new("start gated", -30.0));
    }

    let score = components.iter().map(|c| c.points).sum();
    (score, components)
}

/// Deterministic serving order: bucket rank, urgency descending, priority
/// descending, due ascending (undated last), task id ascending.
pub fn deterministic_cmp(a: &PolicyDecision, b: &PolicyDecision) -> Ordering {
    a.bucket
        .cmp(&b.bucket)
        .then_with(|| b.urgency_score.total_cmp(&a.urgency_score))
        .then_with(|| b.priority_level.cmp(&a.priority_level))
        .then_with(|| match (a.due_epoch, b.due_epoch) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.task_id.cmp(&b.task_id))
}
