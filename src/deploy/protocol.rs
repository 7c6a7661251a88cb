//! Request and response bodies of the deployment API.

use crate::cluster::types::NodeId;
use crate::executor::host::UnloadStatus;
use crate::registry::types::ModelId;
use crate::task::types::{TaskId, TaskState};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ENDPOINT_LOAD_MODEL: &str = "/models/:model_id/_load";
pub const ENDPOINT_UNLOAD_MODELS: &str = "/models/_unload";
pub const ENDPOINT_REFRESH_MODEL: &str = "/models/:model_id/_refresh";
pub const ENDPOINT_GET_MODEL: &str = "/models/:model_id";
pub const ENDPOINT_GET_TASK: &str = "/tasks/:task_id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadModelRequest {
    pub model_id: ModelId,
    /// Explicit deployment plan; all eligible nodes when absent or empty.
    #[serde(default)]
    pub node_ids: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadModelBody {
    #[serde(default)]
    pub node_ids: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadModelResponse {
    pub task_id: TaskId,
    pub state: TaskState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnloadModelsRequest {
    /// Empty unloads every model on the targeted nodes.
    #[serde(default)]
    pub model_ids: Vec<ModelId>,
    #[serde(default)]
    pub node_ids: Option<Vec<NodeId>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UnloadModelsResponse {
    /// Only nodes with something to report; `NOT_FOUND` entries are dropped.
    pub nodes: BTreeMap<NodeId, BTreeMap<ModelId, UnloadStatus>>,
    /// Nodes that could not be reached or answered unexpectedly.
    pub failures: BTreeMap<NodeId, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefreshBody {
    #[serde(default)]
    pub node_ids: Option<Vec<NodeId>>,
    #[serde(default)]
    pub predictor_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RefreshResponse {
    pub refreshed: Vec<NodeId>,
    pub failures: BTreeMap<NodeId, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
