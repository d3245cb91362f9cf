use chrono::{DateTime, Utc};

use vigil_core::features::priority_value;
use vigil_core::{FeatureVector, TaskPriority, TaskSnapshot, TaskStatus};

use crate::error::FeatureError;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Compute the feature vector of `task` as seen at `now`.
///
/// A missing priority is treated as p2; a missing `updated_at` gives zero
/// age. Anything present but unparseable is an error.
pub fn extract_features(task: &TaskSnapshot, now: DateTime<Utc>) -> Result<FeatureVector, FeatureError> {
    if task.task_id.as_str().trim().is_empty() {
        return Err(FeatureError::MissingTaskId);
    }
    if task.status == TaskStatus::Unknown {
        return Err(FeatureError::UnknownStatus);
    }

    let priority = match task.priority.as_deref() {
        None => TaskPriority::DEFAULT,
        Some(raw) => raw
            .parse::<TaskPriority>()
            .map_err(|_| FeatureError::UnknownPriority(raw.to_string()))?,
    };

    let due = parse_opt(task.due_at.as_deref(), "due_at")?;
    let gate = parse_opt(task.do_not_start_before.as_deref(), "do_not_start_before")?;
    let updated = parse_opt(task.updated_at.as_deref(), "updated_at")?;

    let hours_to_due = due.map(|d| (d - now).num_seconds() as f64 / SECONDS_PER_HOUR);
    let within = |limit: f64| hours_to_due.is_some_and(|h| (0.0..=limit).contains(&h));

    let age_hours = updated
        .map(|u| ((now - u).num_seconds() as f64 / SECONDS_PER_HOUR).max(0.0))
        .unwrap_or(0.0);

    Ok(FeatureVector {
        status: task.status,
        priority,
        priority_value: priority_value(priority),
        due_epoch: due.map(|d| d.timestamp()),
        hours_to_due,
        overdue: hours_to_due.is_some_and(|h| h < 0.0),
        due_in_24h: within(24.0),
        due_in_72h: within(72.0),
        due_in_week: within(168.0),
        age_hours,
        is_blocked: task.status == TaskStatus::Blocked || !task.blocked_by.is_empty(),
        is_snoozed: task.status == TaskStatus::Snoozed,
        has_future_start_gate: gate.is_some_and(|g| g > now),
        blocked_by_count: task.blocked_by.len() as u32,
    })
}

fn parse_opt(raw: Option<&str>, field: &'static str) -> Result<Option<DateTime<Utc>>, FeatureError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|_| FeatureError::InvalidTimestamp {
                field,
                value: s.to_string(),
            }),
    }
}
