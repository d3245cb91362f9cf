//! # vigil-policy
//!
//! Deterministic half of the attention pipeline: feature extraction, the
//! policy engine (urgency, bucket, reminder eligibility) and the reminder
//! gate that claims dedup markers.

#![deny(unsafe_code)]

pub mod engine;
pub mod error;
pub mod features;
pub mod reminders;

pub use engine::{deterministic_cmp, urgency, PolicyDecision, PolicyEngine, ReminderEligibility};
pub use error::FeatureError;
pub use features::extract_features;
pub use reminders::{ReminderGate, ReminderOutcome, ReminderStatus};
