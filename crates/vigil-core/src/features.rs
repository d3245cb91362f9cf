use serde::{Deserialize, Serialize};

use crate::task::{TaskPriority, TaskStatus};

/// Deterministic features of one task at one logical instant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// p0 = 1.0, p1 = 0.75, p2 = 0.5, p3 = 0.25.
    pub priority_value: f64,
    /// Unix seconds.
    pub due_epoch: Option<i64>,
    /// Negative when overdue.
    pub hours_to_due: Option<f64>,
    pub overdue: bool,
    pub due_in_24h: bool,
    pub due_in_72h: bool,
    pub due_in_week: bool,
    /// Hours since the task was last updated; zero when unknown.
    pub age_hours: f64,
    pub is_blocked: bool,
    pub is_snoozed: bool,
    pub has_future_start_gate: bool,
    pub blocked_by_count: u32,
}

impl FeatureVector {
    pub fn has_due(&self) -> bool {
        self.due_epoch.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Open or in progress, not blocked, and not held by a start gate.
    pub fn is_actionable(&self) -> bool {
        matches!(self.status, TaskStatus::Open | TaskStatus::InProgress)
            && !self.is_blocked
            && !self.has_future_start_gate
    }
}

pub fn priority_value(priority: TaskPriority) -> f64 {
    match priority {
        TaskPriority::P0 => 1.0,
        TaskPriority::P1 => 0.75,
        TaskPriority::P2 => 0.5,
        TaskPriority::P3 => 0.25,
    }
}
