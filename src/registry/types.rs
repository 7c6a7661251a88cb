use crate::cluster::types::NodeId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub String);

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of a model as seen by one node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelState {
    /// A load task for the model is in flight.
    Loading,
    Loaded,
    PartiallyLoaded,
    LoadFailed,
    Unloaded,
}

/// Where a load was asked to run, recorded so a node that joins later can
/// be brought in line with it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeployPlan {
    pub target_nodes: Vec<NodeId>,
    /// The load named no nodes and went to every eligible node.
    pub deploy_to_all_nodes: bool,
}

/// Worker-set delta propagated to every node.
///
/// Applying an event is a set union (added) followed by a set difference
/// (removed), so re-applying it changes nothing and disjoint events commute.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncEvent {
    #[serde(default)]
    pub added_worker_nodes: BTreeMap<ModelId, Vec<NodeId>>,
    #[serde(default)]
    pub removed_worker_nodes: BTreeMap<ModelId, Vec<NodeId>>,
    /// Model states computed by a coordinator.
    #[serde(default)]
    pub model_states: BTreeMap<ModelId, ModelState>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deploy_plans: BTreeMap<ModelId, DeployPlan>,
}

impl SyncEvent {
    pub fn added(model_id: ModelId, nodes: Vec<NodeId>) -> Self {
        let mut event = Self::default();
        event.added_worker_nodes.insert(model_id, nodes);
        event
    }

    pub fn removed(model_id: ModelId, nodes: Vec<NodeId>) -> Self {
        let mut event = Self::default();
        event.removed_worker_nodes.insert(model_id, nodes);
        event
    }

    pub fn state(model_id: ModelId, state: ModelState) -> Self {
        let mut event = Self::default();
        event.model_states.insert(model_id, state);
        event
    }

    /// A load was admitted: the model is `Loading` under `plan`.
    pub fn admitted(model_id: ModelId, plan: DeployPlan) -> Self {
        let mut event = Self::state(model_id.clone(), ModelState::Loading);
        event.deploy_plans.insert(model_id, plan);
        event
    }

    pub fn is_empty(&self) -> bool {
        self.added_worker_nodes.is_empty()
            && self.removed_worker_nodes.is_empty()
            && self.model_states.is_empty()
            && self.deploy_plans.is_empty()
    }
}

/// Read-only view of one model entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelView {
    pub model_id: ModelId,
    pub state: ModelState,
    pub worker_nodes: Vec<NodeId>,
    pub target_nodes: Vec<NodeId>,
    pub deploy_to_all_nodes: bool,
}
