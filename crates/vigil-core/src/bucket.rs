use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ids::TaskId;

/// Coarse deterministic priority partition. Declaration order is rank order:
/// personalization may reorder inside a bucket but never across buckets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityBucket {
    UrgentDueSoon,
    ReadyHighPriority,
    ReadyNormal,
    Blocked,
    DeferredOrGated,
    CompletedOrCancelled,
    /// Fallback for candidates whose features could not be computed.
    Unclassified,
}

impl PriorityBucket {
    pub const ALL: [PriorityBucket; 7] = [
        Self::UrgentDueSoon,
        Self::ReadyHighPriority,
        Self::ReadyNormal,
        Self::Blocked,
        Self::DeferredOrGated,
        Self::CompletedOrCancelled,
        Self::Unclassified,
    ];

    /// 0 is served first.
    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UrgentDueSoon => "urgent_due_soon",
            Self::ReadyHighPriority => "ready_high_priority",
            Self::ReadyNormal => "ready_normal",
            Self::Blocked => "blocked",
            Self::DeferredOrGated => "deferred_or_gated",
            Self::CompletedOrCancelled => "completed_or_cancelled",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for PriorityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityBucket {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|b| b.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown bucket: {s}"))
    }
}

/// Condition a reminder is raised for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderCondition {
    Overdue,
    DueSoon,
}

impl ReminderCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Overdue => "overdue",
            Self::DueSoon => "due_soon",
        }
    }
}

impl fmt::Display for ReminderCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{task}:{condition}:{window}`. Stable across re-evaluation of unchanged state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(task_id: &TaskId, condition: ReminderCondition, window: &str) -> Self {
        Self(format!("{task_id}:{condition}:{window}"))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attention views served to the transport collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttentionView {
    Current,
    Upcoming,
}

impl AttentionView {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Upcoming => "upcoming",
        }
    }
}

impl FromStr for AttentionView {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "current" => Ok(Self::Current),
            "upcoming" => Ok(Self::Upcoming),
            other => Err(format!("unknown view: {other}")),
        }
    }
}
