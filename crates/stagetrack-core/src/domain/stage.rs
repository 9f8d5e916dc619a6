//! Stage definitions as loaded from the declarative configuration.

use serde::{Deserialize, Serialize};

/// A node of the onboarding state machine.
///
/// The configuration file lists neighbors positionally (`transitions[0]`
/// is the predecessor, `transitions[1]` the successor); after loading,
/// the directional pointers are explicit and the full list survives as
/// jump targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub name: String,
    pub order: u32,
    /// Where a `"prev"` move lands, when defined.
    pub prev: Option<String>,
    /// Where a `"next"` move lands, when defined.
    pub next: Option<String>,
    /// Every neighbor named in the configuration, in file order.
    pub transitions: Vec<String>,
}

/// One record of the `stages.yaml` document.
#[derive(Debug, Clone, Deserialize)]
pub struct StageRecord {
    pub id: String,
    pub name: String,
    pub order: u32,
    #[serde(default)]
    pub transitions: Vec<String>,
}

/// Top-level shape of the stage configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct StageConfig {
    pub stages: Vec<StageRecord>,
}

impl From<StageRecord> for Stage {
    fn from(record: StageRecord) -> Self {
        Stage {
            prev: record.transitions.first().cloned(),
            next: record.transitions.get(1).cloned(),
            id: record.id,
            name: record.name,
            order: record.order,
            transitions: record.transitions,
        }
    }
}
