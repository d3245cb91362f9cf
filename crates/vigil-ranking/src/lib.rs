//! # vigil-ranking
//!
//! Learned half of the attention pipeline and the request path that joins
//! it to the deterministic policy.
//!
//! - [`harness`]: bounded, cancellable scorer invocation
//! - [`composer`]: pure merge of deterministic and learned order
//! - [`controller`]: the audited personalization config
//! - [`service`]: per-request orchestration and decision recording

#![deny(unsafe_code)]

pub mod composer;
pub mod controller;
pub mod error;
pub mod harness;
pub mod mock;
pub mod scorers;
pub mod service;

pub use composer::{compose, learned_eligible, Candidate, ComposedCandidate};
pub use controller::{ControlUpdate, ModeController, RollbackOutcome};
pub use error::{AttentionError, ConfigValidationError, ControlError};
pub use harness::ScoringHarness;
pub use scorers::{LinearScorer, NullScorer};
pub use service::{AttentionService, CandidatePayload, RankRequest, RankResponse};
