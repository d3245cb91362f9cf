use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reason attached to every gate that lacked data.
pub const INSUFFICIENT_DATA: &str = "insufficient_data";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Pass,
    Fail,
    InsufficientData,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub name: String,
    pub status: GateStatus,
    /// Only `Pass` counts as passed.
    pub passed: bool,
    pub reason: String,
    pub observed: Option<f64>,
    pub threshold: Option<f64>,
}

impl GateResult {
    pub fn pass(name: &str, reason: impl Into<String>, observed: Option<f64>, threshold: Option<f64>) -> Self {
        Self::new(name, GateStatus::Pass, reason.into(), observed, threshold)
    }

    pub fn fail(name: &str, reason: impl Into<String>, observed: Option<f64>, threshold: Option<f64>) -> Self {
        Self::new(name, GateStatus::Fail, reason.into(), observed, threshold)
    }

    pub fn insufficient(name: &str, observed: Option<f64>, threshold: Option<f64>) -> Self {
        Self::new(name, GateStatus::InsufficientData, INSUFFICIENT_DATA.to_string(), observed, threshold)
    }

    fn new(name: &str, status: GateStatus, reason: String, observed: Option<f64>, threshold: Option<f64>) -> Self {
        Self {
            name: name.to_string(),
            passed: status == GateStatus::Pass,
            status,
            reason,
            observed,
            threshold,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EventCounts {
    pub requests: u32,
    pub snapshots: u32,
    pub score_records: u32,
    pub scored: u32,
    pub decisions: u32,
    pub feedback_evidence: u32,
    pub reminders_sent: u32,
    pub config_changes: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMeans {
    pub usefulness: Option<f64>,
    pub timing_fit: Option<f64>,
    pub interrupt_cost: Option<f64>,
}

/// `None` wherever the denominator was empty.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayMetrics {
    pub acceptance_rate: Option<f64>,
    pub acceptance_uplift_vs_baseline: Option<f64>,
    pub duplicate_reminder_rate: Option<f64>,
    pub ordering_shift_rate: Option<f64>,
    pub confidence_above_threshold_rate: Option<f64>,
    pub mean_labels: TargetMeans,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRow {
    pub target: String,
    pub samples: u32,
    pub mean_observed: f64,
    pub mean_predicted: f64,
    pub gap: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReproductionSummary {
    pub checked: u32,
    pub mismatched: u32,
    /// Decisions whose snapshot was absent or failed its digest check.
    pub missing_inputs: u32,
    /// First few mismatch descriptions.
    pub examples: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub counts: EventCounts,
    pub metrics: ReplayMetrics,
    pub calibration: Vec<CalibrationRow>,
    pub reproduction: ReproductionSummary,
    pub gates: Vec<GateResult>,
    pub rollout_ready: bool,
}

impl ReplayReport {
    pub fn gate(&self, name: &str) -> Option<&GateResult> {
        self.gates.iter().find(|g| g.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_gate_never_passes() {
        let gate = GateResult::insufficient("shadow_data_sufficient", Some(3.0), Some(10.0));
        assert!(!gate.passed);
        assert_eq!(gate.reason, INSUFFICIENT_DATA);
    }

    #[test]
    fn gate_status_serializes_snake_case() {
        let gate = GateResult::fail("x", "too many", Some(0.5), Some(0.1));
        let json = serde_json::to_value(&gate).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["passed"], false);
        assert_eq!(
            serde_json::to_value(GateStatus::InsufficientData).unwrap(),
            "insufficient_data"
        );
    }
}
