//! Per-node map of which nodes serve which model.
//!
//! Local load/unload outcomes and remote sync events both go through the
//! same union/difference operations on a per-model DashMap entry, so the
//! shard lock is the per-model lock for both paths.

use super::types::{DeployPlan, ModelId, ModelState, ModelView, SyncEvent};
use crate::cluster::types::NodeId;

use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct ModelEntry {
    worker_nodes: BTreeSet<NodeId>,
    /// Nodes the last deployment plan targeted.
    target_nodes: BTreeSet<NodeId>,
    deploy_to_all_nodes: bool,
    state: Option<ModelState>,
}

impl ModelEntry {
    fn effective_state(&self) -> ModelState {
        match self.state {
            Some(state) => state,
            None if self.worker_nodes.is_empty() => ModelState::Unloaded,
            None => ModelState::Loaded,
        }
    }

    /// An entry with no workers carries nothing worth keeping unless a load
    /// is still in flight or the failure should remain visible.
    fn is_disposable(&self) -> bool {
        self.worker_nodes.is_empty()
            && !matches!(self.state, Some(ModelState::Loading | ModelState::LoadFailed))
    }
}

#[derive(Default)]
pub struct WorkerNodeRegistry {
    models: DashMap<ModelId, ModelEntry>,
}

impl WorkerNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_worker_nodes(&self, model_id: &ModelId, node_ids: &[NodeId]) {
        if node_ids.is_empty() {
            return;
        }
        let mut entry = self.models.entry(model_id.clone()).or_default();
        entry.worker_nodes.extend(node_ids.iter().cloned());
        tracing::debug!("Model {} worker nodes: {:?}", model_id, entry.worker_nodes);
    }

    /// Removes `node_ids` from the worker and target sets. The entry is
    /// dropped once nothing is left to report.
    pub fn remove_worker_nodes(&self, model_id: &ModelId, node_ids: &[NodeId]) {
        {
            let Some(mut entry) = self.models.get_mut(model_id) else {
                return;
            };
            for node_id in node_ids {
                entry.worker_nodes.remove(node_id);
                entry.target_nodes.remove(node_id);
            }
        }
        self.drop_if_disposable(model_id);
    }

    pub fn get_worker_nodes(&self, model_id: &ModelId) -> Vec<NodeId> {
        self.models
            .get(model_id)
            .map(|entry| entry.worker_nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// State of the model; an unknown model is `Unloaded`.
    pub fn get_model_state(&self, model_id: &ModelId) -> ModelState {
        self.models
            .get(model_id)
            .map(|entry| entry.effective_state())
            .unwrap_or(ModelState::Unloaded)
    }

    pub fn set_model_state(&self, model_id: &ModelId, state: ModelState) {
        if state == ModelState::Unloaded {
            if let Some(mut entry) = self.models.get_mut(model_id) {
                entry.state = Some(state);
            }
            self.drop_if_disposable(model_id);
            return;
        }
        self.models.entry(model_id.clone()).or_default().state = Some(state);
    }

    pub fn set_deploy_plan(&self, model_id: &ModelId, plan: &DeployPlan) {
        let mut entry = self.models.entry(model_id.clone()).or_default();
        entry.target_nodes = plan.target_nodes.iter().cloned().collect();
        entry.deploy_to_all_nodes = plan.deploy_to_all_nodes;
    }

    pub fn get_deploy_plan(&self, model_id: &ModelId) -> Option<DeployPlan> {
        self.models.get(model_id).map(|entry| DeployPlan {
            target_nodes: entry.target_nodes.iter().cloned().collect(),
            deploy_to_all_nodes: entry.deploy_to_all_nodes,
        })
    }

    pub fn get_target_nodes(&self, model_id: &ModelId) -> Vec<NodeId> {
        self.models
            .get(model_id)
            .map(|entry| entry.target_nodes.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn view(&self, model_id: &ModelId) -> ModelView {
        match self.models.get(model_id) {
            Some(entry) => ModelView {
                model_id: model_id.clone(),
                state: entry.effective_state(),
                worker_nodes: entry.worker_nodes.iter().cloned().collect(),
                target_nodes: entry.target_nodes.iter().cloned().collect(),
                deploy_to_all_nodes: entry.deploy_to_all_nodes,
            },
            None => ModelView {
                model_id: model_id.clone(),
                state: ModelState::Unloaded,
                worker_nodes: Vec::new(),
                target_nodes: Vec::new(),
                deploy_to_all_nodes: false,
            },
        }
    }

    pub fn model_ids(&self) -> Vec<ModelId> {
        let mut ids: Vec<ModelId> = self.models.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn apply_sync(&self, event: &SyncEvent) {
        for (model_id, node_ids) in &event.added_worker_nodes {
            self.add_worker_nodes(model_id, node_ids);
        }
        for (model_id, node_ids) in &event.removed_worker_nodes {
            self.remove_worker_nodes(model_id, node_ids);
        }
        for (model_id, plan) in &event.deploy_plans {
            self.set_deploy_plan(model_id, plan);
        }
        for (model_id, state) in &event.model_states {
            self.set_model_state(model_id, *state);
        }
    }

    /// Replaces every worker set with a full snapshot. Models missing from
    /// the snapshot lose all their workers.
    pub fn replace_all(&self, snapshot: &BTreeMap<ModelId, Vec<NodeId>>) {
        for model_id in self.model_ids() {
            if snapshot.contains_key(&model_id) {
                continue;
            }
            if let Some(mut entry) = self.models.get_mut(&model_id) {
                entry.worker_nodes.clear();
            }
            self.drop_if_disposable(&model_id);
        }

        for (model_id, node_ids) in snapshot {
            let mut entry = self.models.entry(model_id.clone()).or_default();
            entry.worker_nodes = node_ids.iter().cloned().collect();
        }
        tracing::debug!("Replaced worker nodes from full sync ({} models)", snapshot.len());
    }

    /// Drops `node_id` from every worker set. A fully loaded model that lost
    /// one of its planned workers becomes partially loaded.
    /// Returns the affected models.
    pub fn remove_node(&self, node_id: &NodeId) -> Vec<ModelId> {
        let mut affected = Vec::new();
        for mut entry in self.models.iter_mut() {
            if !entry.worker_nodes.remove(node_id) {
                continue;
            }
            if entry.state == Some(ModelState::Loaded)
                && !entry.worker_nodes.is_empty()
                && entry.worker_nodes.len() < entry.target_nodes.len()
            {
                entry.state = Some(ModelState::PartiallyLoaded);
            }
            affected.push(entry.key().clone());
        }

        for model_id in &affected {
            self.drop_if_disposable(model_id);
        }
        if !affected.is_empty() {
            tracing::info!("Removed node {} from worker nodes of {:?}", node_id, affected);
        }
        affected
    }

    fn drop_if_disposable(&self, model_id: &ModelId) {
        if self
            .models
            .remove_if(model_id, |_, entry| entry.is_disposable())
            .is_some()
        {
            tracing::debug!("Dropped registry entry for model {}", model_id);
        }
    }
}
