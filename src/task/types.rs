use crate::cluster::types::NodeId;
use crate::registry::types::ModelId;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier assigned to a task by the task store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    LoadModel,
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskType::LoadModel => f.write_str("load model"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Running,
    Completed,
    CompletedWithError,
    Failed,
}

impl TaskState {
    pub fn is_done(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::CompletedWithError | TaskState::Failed
        )
    }
}

/// Persisted record of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Assigned by the store on creation.
    pub task_id: Option<TaskId>,
    pub task_type: TaskType,
    pub model_id: ModelId,
    pub state: TaskState,
    pub create_time: u64,
    pub last_update_time: u64,
    pub is_async: bool,
    pub worker_nodes: Vec<NodeId>,
    /// JSON map of node id to error message, set on terminal states.
    pub error: Option<String>,
}

impl Task {
    pub fn new(task_type: TaskType, model_id: ModelId, worker_nodes: Vec<NodeId>) -> Self {
        let now = now_ms();
        Self {
            task_id: None,
            task_type,
            model_id,
            state: TaskState::Created,
            create_time: now,
            last_update_time: now,
            is_async: true,
            worker_nodes,
            error: None,
        }
    }
}

/// Fields to change on a persisted task. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskUpdate {
    pub state: Option<TaskState>,
    pub error: Option<String>,
}

impl TaskUpdate {
    pub fn state(state: TaskState) -> Self {
        Self {
            state: Some(state),
            error: None,
        }
    }

    pub fn terminal(state: TaskState, error: Option<String>) -> Self {
        Self {
            state: Some(state),
            error,
        }
    }
}

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
