//! # vigil-replay
//!
//! Offline evaluation over recorded history.
//!
//! - [`evaluator`]: replay a window, compute metrics, check rollout gates
//! - [`lab`]: compare a candidate config against the live one and gate
//!   its application

#![deny(unsafe_code)]

pub mod error;
pub mod evaluator;
pub mod lab;
pub mod report;

pub use error::{LabError, ReplayError};
pub use evaluator::{acceptance_rate, group_requests, load_window, RecordedRequest, ReplayEvaluator};
pub use lab::{ExperimentLab, ExperimentRequest, LabOverview};
pub use report::{
    CalibrationRow, EventCounts, GateResult, GateStatus, ReplayMetrics, ReplayReport, ReproductionSummary,
    TargetMeans, INSUFFICIENT_DATA,
};
