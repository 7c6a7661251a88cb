//! In-flight task bookkeeping.
//!
//! One entry per task the local node coordinates: which nodes were asked,
//! which have not answered yet, and what the failed ones said. Reports for
//! the same task mutate the entry under its DashMap shard lock, and the
//! entry is removed exactly once, by whichever report empties the
//! remaining set.

use super::types::{TaskId, TaskState, TaskType};
use crate::cluster::types::NodeId;
use crate::registry::types::{ModelId, ModelState};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("task {0} is already tracked")]
    Duplicate(TaskId),

    #[error("exceed max {task_type} task limit {limit}")]
    LimitExceeded { task_type: TaskType, limit: usize },

    #[error("task {0} has no worker nodes")]
    NoWorkerNodes(TaskId),
}

#[derive(Debug)]
struct TaskEntry {
    task_type: TaskType,
    model_id: ModelId,
    /// Nodes already serving the model when the task was admitted.
    prior_workers: BTreeSet<NodeId>,
    remaining: BTreeSet<NodeId>,
    succeeded: BTreeSet<NodeId>,
    errors: BTreeMap<NodeId, String>,
    deadline: Instant,
}

/// Aggregated result of a task whose nodes have all reported.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub model_id: ModelId,
    pub state: TaskState,
    pub model_state: ModelState,
    pub succeeded: Vec<NodeId>,
    pub prior_workers: Vec<NodeId>,
    pub errors: BTreeMap<NodeId, String>,
}

impl TaskOutcome {
    fn from_entry(task_id: TaskId, entry: TaskEntry) -> Self {
        let (state, model_state) = if entry.succeeded.is_empty() {
            (TaskState::Failed, ModelState::LoadFailed)
        } else if !entry.errors.is_empty() {
            (TaskState::CompletedWithError, ModelState::PartiallyLoaded)
        } else {
            (TaskState::Completed, ModelState::Loaded)
        };

        Self {
            task_id,
            task_type: entry.task_type,
            model_id: entry.model_id,
            state,
            model_state,
            succeeded: entry.succeeded.into_iter().collect(),
            prior_workers: entry.prior_workers.into_iter().collect(),
            errors: entry.errors,
        }
    }

    /// Per-node errors as a JSON object, if any node failed.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        serde_json::to_string(&self.errors).ok()
    }
}

/// Result of feeding one node's report into the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeReport {
    /// No such task in flight: already finished, force-closed, or never ours.
    UnknownTask,
    /// The node was not expected, or already reported.
    NotExpected,
    Pending { remaining: usize },
    Finished(TaskOutcome),
}

#[derive(Default)]
pub struct TaskStateCache {
    tasks: DashMap<TaskId, TaskEntry>,
    admission: Mutex<()>,
}

impl TaskStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a task that waits on `node_ids`. `prior_workers` are
    /// the nodes that already served the model before this task.
    ///
    /// With a `limit`, admission fails once that many tasks of the same type
    /// are in flight.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        task_id: TaskId,
        task_type: TaskType,
        model_id: ModelId,
        node_ids: &[NodeId],
        prior_workers: &[NodeId],
        limit: Option<usize>,
        timeout: Duration,
    ) -> Result<(), CacheError> {
        if node_ids.is_empty() {
            return Err(CacheError::NoWorkerNodes(task_id));
        }

        let _admission = self.admission.lock();
        if let Some(limit) = limit
            && self.running_count(task_type) >= limit
        {
            return Err(CacheError::LimitExceeded { task_type, limit });
        }
        if self.tasks.contains_key(&task_id) {
            return Err(CacheError::Duplicate(task_id));
        }

        let remaining: BTreeSet<NodeId> = node_ids.iter().cloned().collect();
        tracing::debug!("Tracking task {} on {} node(s)", task_id, remaining.len());
        self.tasks.insert(
            task_id,
            TaskEntry {
                task_type,
                model_id,
                prior_workers: prior_workers.iter().cloned().collect(),
                remaining,
                succeeded: BTreeSet::new(),
                errors: BTreeMap::new(),
                deadline: Instant::now() + timeout,
            },
        );
        Ok(())
    }

    /// Records that `node_id` finished its part of `task_id`, with an error
    /// if it failed.
    pub fn record_node_done(
        &self,
        task_id: &TaskId,
        node_id: &NodeId,
        error: Option<String>,
    ) -> NodeReport {
        {
            let Some(mut entry) = self.tasks.get_mut(task_id) else {
                return NodeReport::UnknownTask;
            };
            if !entry.remaining.remove(node_id) {
                return NodeReport::NotExpected;
            }
            match error {
                Some(error) => {
                    entry.errors.insert(node_id.clone(), error);
                }
                None => {
                    entry.succeeded.insert(node_id.clone());
                }
            }
            if !entry.remaining.is_empty() {
                return NodeReport::Pending {
                    remaining: entry.remaining.len(),
                };
            }
        }

        match self
            .tasks
            .remove_if(task_id, |_, entry| entry.remaining.is_empty())
        {
            Some((task_id, entry)) => NodeReport::Finished(TaskOutcome::from_entry(task_id, entry)),
            None => NodeReport::UnknownTask,
        }
    }

    /// Tasks whose deadline has passed.
    pub fn expired(&self, now: Instant) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Closes a task regardless of outstanding nodes. Silent nodes get
    /// `reason` as their error and the task fails as a whole. The model
    /// stays partially loaded when it was already served before the task.
    pub fn force_close(&self, task_id: &TaskId, reason: &str) -> Option<TaskOutcome> {
        let (task_id, mut entry) = self.tasks.remove(task_id)?;
        let silent = std::mem::take(&mut entry.remaining);
        for node_id in silent {
            entry.errors.insert(node_id, reason.to_string());
        }

        let mut outcome = TaskOutcome::from_entry(task_id, entry);
        outcome.state = TaskState::Failed;
        outcome.model_state = if outcome.prior_workers.is_empty() {
            ModelState::LoadFailed
        } else {
            ModelState::PartiallyLoaded
        };
        Some(outcome)
    }

    /// Records `reason` as the error of `node_id` in every task still
    /// waiting on it. Returns the tasks this finished.
    pub fn fail_node(&self, node_id: &NodeId, reason: &str) -> Vec<TaskOutcome> {
        let waiting: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|entry| entry.remaining.contains(node_id))
            .map(|entry| entry.key().clone())
            .collect();

        waiting
            .iter()
            .filter_map(|task_id| {
                match self.record_node_done(task_id, node_id, Some(reason.to_string())) {
                    NodeReport::Finished(outcome) => Some(outcome),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn running_count(&self, task_type: TaskType) -> usize {
        self.tasks
            .iter()
            .filter(|entry| entry.task_type == task_type)
            .count()
    }

    pub fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
