//! The onboarding stage graph.
//!
//! A configured, directed state machine of allowed client transitions.
//! Loaded once at startup from a declarative YAML document and immutable
//! afterwards; readers share it without locking.
//!
//! ```text
//! registration ──► onboarding ──► active ⟲
//!        ▲──────────────┘▲───────────┘
//! ```
//!
//! Each node carries an explicit `prev` and `next` pointer (positions 0
//! and 1 of its configured transition list) plus the full list as jump
//! targets. A resolve request is either a reserved token (`"next"`,
//! `"prev"`) or a literal node id.

use std::collections::HashMap;
use std::path::Path;

use tracing::{error, info};

use crate::domain::stage::{Stage, StageConfig};
use crate::error::{Result, TrackError};

/// Reserved direction token for a forward move.
pub const DIRECTION_NEXT: &str = "next";
/// Reserved direction token for a rollback move.
pub const DIRECTION_PREV: &str = "prev";

/// Immutable, validated stage graph.
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    /// Stages ordered by `order` ascending.
    stages: Vec<Stage>,
    index: HashMap<String, usize>,
}

impl StageGraph {
    /// Build a graph from already-parsed records, validating the
    /// structural invariants: at least one node, unique positive orders,
    /// every referenced transition target exists.
    pub fn new(stages: Vec<Stage>) -> Result<Self> {
        if stages.is_empty() {
            return Err(TrackError::InvalidInput("stage graph has no nodes".into()));
        }

        let mut stages = stages;
        stages.sort_by_key(|s| s.order);

        let mut index = HashMap::with_capacity(stages.len());
        for (i, stage) in stages.iter().enumerate() {
            if stage.order == 0 {
                return Err(TrackError::InvalidInput(format!(
                    "stage '{}' has non-positive order",
                    stage.id
                )));
            }
            if index.insert(stage.id.clone(), i).is_some() {
                return Err(TrackError::InvalidInput(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        for pair in stages.windows(2) {
            if pair[0].order == pair[1].order {
                return Err(TrackError::InvalidInput(format!(
                    "stages '{}' and '{}' share order {}",
                    pair[0].id, pair[1].id, pair[0].order
                )));
            }
        }

        for stage in &stages {
            for target in &stage.transitions {
                if !index.contains_key(target) {
                    return Err(TrackError::InvalidInput(format!(
                        "stage '{}' references unknown transition target '{}'",
                        stage.id, target
                    )));
                }
            }
        }

        Ok(Self { stages, index })
    }

    /// An empty graph: every resolve fails. Used when loading the
    /// configuration failed (a logged, non-fatal condition).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse and validate a YAML stage document.
    pub fn from_yaml(input: &str) -> Result<Self> {
        let config: StageConfig = serde_yaml::from_str(input)
            .map_err(|e| TrackError::InvalidInput(format!("stage config: {e}")))?;
        Self::new(config.stages.into_iter().map(Stage::from).collect())
    }

    /// Load the graph from a file. Failure yields an empty graph so the
    /// process still boots; every transition then fails.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read stage config");
                return Self::empty();
            }
        };
        match Self::from_yaml(&raw) {
            Ok(graph) => {
                info!(path = %path.display(), stages = graph.len(), "stage graph loaded");
                graph
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to parse stage config");
                Self::empty()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// All stages, ordered by `order` ascending.
    pub fn list(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, id: &str) -> Option<&Stage> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// The stage with the highest order — the conversion target.
    pub fn last_stage(&self) -> Option<&Stage> {
        self.stages.last()
    }

    /// Resolve a transition request to the id of the stage it lands on.
    ///
    /// * empty `current` + node-id `direction`: bootstrap of a new client;
    /// * `"next"` / `"prev"`: follow the node's directional pointer, or
    ///   fail with `InvalidTransition` when the pointer is undefined;
    /// * any existing node id: arbitrary jump;
    /// * anything else: `InvalidDirection`.
    pub fn resolve(&self, current: &str, direction: &str) -> Result<String> {
        if self.stages.is_empty() {
            return Err(TrackError::InvalidDirection(
                "the stage graph is empty".into(),
            ));
        }
        if current.is_empty() {
            if self.contains(direction) {
                return Ok(direction.to_string());
            }
            return Err(TrackError::InvalidDirection(format!(
                "'{direction}' is not a stage of the graph"
            )));
        }

        match direction {
            DIRECTION_NEXT | DIRECTION_PREV => {
                let node = self.get(current).ok_or_else(|| TrackError::InvalidTransition {
                    from: current.to_string(),
                    direction: direction.to_string(),
                    reason: "current stage is not in the graph".into(),
                })?;
                let target = if direction == DIRECTION_NEXT {
                    node.next.as_ref()
                } else {
                    node.prev.as_ref()
                };
                target.cloned().ok_or_else(|| TrackError::InvalidTransition {
                    from: current.to_string(),
                    direction: direction.to_string(),
                    reason: "stage defines fewer than two transitions".into(),
                })
            }
            _ if self.contains(direction) => Ok(direction.to_string()),
            _ => Err(TrackError::InvalidDirection(format!(
                "'{direction}' is neither a reserved token nor a stage id"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::stage::StageRecord;

    fn record(id: &str, order: u32, transitions: &[&str]) -> Stage {
        Stage::from(StageRecord {
            id: id.into(),
            name: id.to_uppercase(),
            order,
            transitions: transitions.iter().map(|s| s.to_string()).collect(),
        })
    }

    fn three_stage_graph() -> StageGraph {
        StageGraph::new(vec![
            record("registration", 1, &["registration", "onboarding"]),
            record("onboarding", 2, &["registration", "active"]),
            record("active", 3, &["onboarding", "active"]),
        ])
        .unwrap()
    }

    #[test]
    fn bootstrap_resolves_to_named_stage() {
        let graph = three_stage_graph();
        assert_eq!(graph.resolve("", "registration").unwrap(), "registration");
    }

    #[test]
    fn bootstrap_rejects_unknown_stage() {
        let graph = three_stage_graph();
        let err = graph.resolve("", "nope").unwrap_err();
        assert!(matches!(err, TrackError::InvalidDirection(_)));
    }

    #[test]
    fn next_follows_successor_pointer() {
        let graph = three_stage_graph();
        assert_eq!(graph.resolve("registration", "next").unwrap(), "onboarding");
        assert_eq!(graph.resolve("onboarding", "next").unwrap(), "active");
    }

    #[test]
    fn prev_follows_predecessor_pointer() {
        let graph = three_stage_graph();
        assert_eq!(graph.resolve("onboarding", "prev").unwrap(), "registration");
    }

    #[test]
    fn self_transition_is_permitted() {
        let graph = three_stage_graph();
        assert_eq!(graph.resolve("active", "next").unwrap(), "active");
    }

    #[test]
    fn jump_to_existing_stage_is_permitted() {
        let graph = three_stage_graph();
        assert_eq!(graph.resolve("registration", "active").unwrap(), "active");
    }

    #[test]
    fn unknown_direction_fails() {
        let graph = three_stage_graph();
        let err = graph.resolve("registration", "sideways").unwrap_err();
        assert!(matches!(err, TrackError::InvalidDirection(_)));
    }

    #[test]
    fn short_transition_list_fails_next_and_prev() {
        let graph = StageGraph::new(vec![
            record("lone", 1, &["lone"]),
        ])
        .unwrap();
        assert!(matches!(
            graph.resolve("lone", "next").unwrap_err(),
            TrackError::InvalidTransition { .. }
        ));
        // A single entry still defines the predecessor.
        assert_eq!(graph.resolve("lone", "prev").unwrap(), "lone");
    }

    #[test]
    fn empty_graph_fails_everything_with_invalid_direction() {
        let graph = StageGraph::empty();
        for (current, direction) in [("", "registration"), ("registration", "next"), ("a", "b")] {
            assert!(matches!(
                graph.resolve(current, direction).unwrap_err(),
                TrackError::InvalidDirection(_)
            ));
        }
    }

    #[test]
    fn next_then_prev_round_trips() {
        let graph = three_stage_graph();
        let forward = graph.resolve("registration", "next").unwrap();
        assert_eq!(graph.resolve(&forward, "prev").unwrap(), "registration");
    }

    #[test]
    fn validation_rejects_duplicate_orders() {
        let err = StageGraph::new(vec![
            record("a", 1, &["a", "b"]),
            record("b", 1, &["a", "b"]),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("order"));
    }

    #[test]
    fn validation_rejects_zero_order() {
        let err = StageGraph::new(vec![record("a", 0, &["a"])]).unwrap_err();
        assert!(err.to_string().contains("non-positive"));
    }

    #[test]
    fn validation_rejects_dangling_transition() {
        let err = StageGraph::new(vec![record("a", 1, &["a", "ghost"])]).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn list_is_ordered_and_last_stage_has_highest_order() {
        let graph = StageGraph::new(vec![
            record("active", 3, &["onboarding", "active"]),
            record("registration", 1, &["registration", "onboarding"]),
            record("onboarding", 2, &["registration", "active"]),
        ])
        .unwrap();
        let ids: Vec<_> = graph.list().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["registration", "onboarding", "active"]);
        assert_eq!(graph.last_stage().unwrap().id, "active");
    }

    #[test]
    fn yaml_document_parses() {
        let graph = StageGraph::from_yaml(
            r#"
stages:
  - id: registration
    name: Registration
    order: 1
    transitions: [registration, onboarding]
  - id: onboarding
    name: Onboarding
    order: 2
    transitions: [registration, active]
  - id: active
    name: Active
    order: 3
    transitions: [onboarding, active]
"#,
        )
        .unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.get("onboarding").unwrap().next.as_deref(), Some("active"));
        assert_eq!(graph.get("onboarding").unwrap().prev.as_deref(), Some("registration"));
    }
}
