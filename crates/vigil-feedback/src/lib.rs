//! # vigil-feedback
//!
//! Weak-label evidence from operator behaviour. Actions are recorded as
//! they arrive; once an action's follow-up window closes it is interpreted
//! against its context window and the resulting evidence is appended.

#![deny(unsafe_code)]

pub mod context;
pub mod interpreter;
pub mod recorder;

pub use context::ContextWindow;
pub use interpreter::{FeedbackInterpreter, Interpretation};
pub use recorder::FeedbackRecorder;
