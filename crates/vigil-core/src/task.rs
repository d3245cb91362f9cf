//! Read-only view of a task as supplied by the task lifecycle store.
//!
//! Timestamps and the priority label are kept exactly as received. Parsing
//! happens in the feature extractor so that malformed input is captured in the
//! snapshot and reproduced on replay.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Blocked,
    Snoozed,
    Done,
    Cancelled,
    #[serde(other)]
    Unknown,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Snoozed => "snoozed",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Priority levels, `P0` most important.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    P0,
    P1,
    P2,
    P3,
}

impl TaskPriority {
    pub const DEFAULT: TaskPriority = TaskPriority::P2;

    /// Level where a larger number means more important (p0 = 3, p3 = 0).
    pub fn level(&self) -> u8 {
        match self {
            Self::P0 => 3,
            Self::P1 => 2,
            Self::P2 => 1,
            Self::P3 => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::P0 => "p0",
            Self::P1 => "p1",
            Self::P2 => "p2",
            Self::P3 => "p3",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p0" => Ok(Self::P0),
            "p1" => Ok(Self::P1),
            "p2" => Ok(Self::P2),
            "p3" => Ok(Self::P3),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    #[serde(default)]
    pub title: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Option<String>,
    /// RFC 3339.
    #[serde(default)]
    pub due_at: Option<String>,
    /// RFC 3339. The task must not be started before this instant.
    #[serde(default)]
    pub do_not_start_before: Option<String>,
    /// RFC 3339.
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<TaskId>,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl TaskSnapshot {
    pub fn new(task_id: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            task_id: TaskId::from_raw(task_id),
            title: String::new(),
            status,
            priority: None,
            due_at: None,
            do_not_start_before: None,
            updated_at: None,
            blocked_by: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority.as_str().to_owned());
        self
    }

    pub fn with_due_at(mut self, due_at: impl Into<String>) -> Self {
        self.due_at = Some(due_at.into());
        self
    }

    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    pub fn with_start_gate(mut self, not_before: impl Into<String>) -> Self {
        self.do_not_start_before = Some(not_before.into());
        self
    }
}
