use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Task ids are minted by the task lifecycle store; `TaskId::new` exists for tests.
branded_id!(TaskId, "task");
branded_id!(EventId, "evt");
branded_id!(RequestId, "req");
branded_id!(SnapshotId, "snap");
branded_id!(ScoreId, "score");
branded_id!(DecisionId, "dec");
branded_id!(EvidenceId, "evid");
branded_id!(RunId, "run");

impl EvidenceId {
    /// Evidence is keyed by the action it interprets, so re-interpreting the
    /// same action always yields the same id.
    pub fn for_action(action: &EventId) -> Self {
        Self(format!("evid_{action}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_has_prefix() {
        let id = RequestId::new();
        assert!(id.as_str().starts_with("req_"), "got: {id}");
    }

    #[test]
    fn snapshot_id_has_prefix() {
        let id = SnapshotId::new();
        assert!(id.as_str().starts_with("snap_"), "got: {id}");
    }

    #[test]
    fn run_id_has_prefix() {
        let id = RunId::new();
        assert!(id.as_str().starts_with("run_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = DecisionId::new();
        let b = DecisionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = ScoreId::new();
        let parsed: ScoreId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serde_is_transparent() {
        let id = TaskId::from_raw("T1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"T1\"");
        let parsed: TaskId = serde_json::from_str("\"T1\"").unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn task_ids_order_lexically() {
        let mut ids = vec![TaskId::from_raw("b"), TaskId::from_raw("a"), TaskId::from_raw("c")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[2].as_str(), "c");
    }

    #[test]
    fn evidence_id_is_derived_from_action() {
        let action = EventId::from_raw("evt_42");
        assert_eq!(EvidenceId::for_action(&action), EvidenceId::for_action(&action));
        assert_eq!(EvidenceId::for_action(&action).as_str(), "evid_evt_42");
    }

    #[test]
    fn monotonic_ordering() {
        let ids: Vec<EventId> = (0..100).map(|_| EventId::new()).collect();
        for w in ids.windows(2) {
            assert!(w[0].as_str() < w[1].as_str(), "not monotonic: {} >= {}", w[0], w[1]);
        }
    }
}
