//! # vigil-core
//!
//! Shared types for the attention subsystem: identifiers, task snapshots,
//! feature vectors, priority buckets, personalization config, the append-only
//! history records, and the scoring capability trait.

#![deny(unsafe_code)]

pub mod bucket;
pub mod features;
pub mod history;
pub mod ids;
pub mod mode;
pub mod records;
pub mod scorer;
pub mod task;

pub use bucket::{AttentionView, DedupKey, PriorityBucket, ReminderCondition};
pub use features::FeatureVector;
pub use history::{HistoryEntry, HistoryEvent, HistoryKind};
pub use mode::{PersonalizationConfig, PersonalizationMode};
pub use scorer::{ScoreOutput, ScoreRequest, Scorer, ScorerError};
pub use task::{TaskPriority, TaskSnapshot, TaskStatus};
