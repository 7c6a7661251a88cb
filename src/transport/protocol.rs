//! Internal Wire Protocol
//!
//! Every node-to-node exchange of the deployment core is one `NodeMessage`
//! answered by one `NodeReply`, posted as JSON to a single internal endpoint
//! and dispatched on the `kind` tag. Node-local failures travel as data
//! inside replies, never as transport errors.

use crate::cluster::types::NodeId;
use crate::executor::host::UnloadStatus;
use crate::registry::types::{ModelId, SyncEvent};
use crate::task::types::TaskId;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const ENDPOINT_NODE_MESSAGE: &str = "/internal/ml/message";

/// A worker's completion notice for its part of a load task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadDone {
    pub task_id: TaskId,
    pub model_id: ModelId,
    pub worker_node_id: NodeId,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeMessage {
    /// Load `model_id` and report back to `coordinator` with `LoadDone`.
    LoadCommand {
        task_id: TaskId,
        model_id: ModelId,
        coordinator: NodeId,
    },
    LoadDone(LoadDone),
    /// Empty `model_ids` means every locally loaded model.
    UnloadCommand { model_ids: Vec<ModelId> },
    RefreshCache {
        model_id: ModelId,
        predictor_only: bool,
    },
    Sync(SyncEvent),
    FullSync {
        worker_nodes: BTreeMap<ModelId, Vec<NodeId>>,
    },
    LocalModels,
}

impl NodeMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeMessage::LoadCommand { .. } => "load_command",
            NodeMessage::LoadDone(_) => "load_done",
            NodeMessage::UnloadCommand { .. } => "unload_command",
            NodeMessage::RefreshCache { .. } => "refresh_cache",
            NodeMessage::Sync(_) => "sync",
            NodeMessage::FullSync { .. } => "full_sync",
            NodeMessage::LocalModels => "local_models",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeReply {
    Ack,
    UnloadResult {
        node_id: NodeId,
        statuses: BTreeMap<ModelId, UnloadStatus>,
    },
    RefreshResult {
        node_id: NodeId,
        error: Option<String>,
    },
    LocalModels {
        node_id: NodeId,
        model_ids: Vec<ModelId>,
    },
    Rejected { reason: String },
}
