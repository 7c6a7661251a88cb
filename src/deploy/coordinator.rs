//! Deployment Coordinator
//!
//! Drives load, unload and cache-refresh operations from the node that
//! received the request.
//!
//! ## Load path
//! 1. **Admission**: circuit breakers, request shape, deployment plan, running-task
//!    limit. Failures here are returned to the caller; nothing is dispatched.
//! 2. **Bookkeeping**: the task is persisted (its id comes from the store), tracked in
//!    the `TaskStateCache` with a deadline, and the model is synced as `LOADING` with
//!    its deployment plan.
//! 3. **Dispatch**: a `LoadCommand` goes to every target. An undeliverable command
//!    counts as that node's error immediately.
//! 4. **Gather**: each `LoadDone` removes its node from the remaining set; successes
//!    join the worker set and are synced cluster-wide.
//! 5. **Outcome**: the report that empties the remaining set computes the task and
//!    model state, syncs the model state, and force-persists the result.
//!
//! Tasks whose nodes never answer are closed by the deadline sweep.
//!
//! ## Auto-redeploy
//! When a node joins, the lowest-id live node re-runs the load of every model
//! whose recorded plan covers the newcomer, up to `auto_redeploy_max_retries`
//! times per model.

use super::error::DeployError;
use super::node::NodeServices;
use super::protocol::{
    LoadModelRequest, LoadModelResponse, RefreshResponse, UnloadModelsRequest,
    UnloadModelsResponse,
};
use super::sync::SyncBroadcaster;
use super::worker::ModelWorker;
use crate::breaker::registry::CircuitBreakerRegistry;
use crate::cluster::discovery::{EligibilityCriteria, NodeDiscovery};
use crate::cluster::types::NodeId;
use crate::config::DeployConfig;
use crate::executor::host::UnloadStatus;
use crate::registry::types::{DeployPlan, ModelId, ModelState, ModelView, SyncEvent};
use crate::registry::worker_nodes::WorkerNodeRegistry;
use crate::task::cache::{CacheError, NodeReport, TaskOutcome, TaskStateCache};
use crate::task::store::TaskUpdater;
use crate::task::types::{Task, TaskId, TaskState, TaskType, TaskUpdate};
use crate::transport::protocol::{LoadDone, NodeMessage, NodeReply};
use crate::transport::Transport;

use anyhow::Result;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

pub const NODE_LEFT_ERROR: &str = "node left the cluster";
const OUTCOME_CAPACITY: usize = 256;

pub struct DeploymentCoordinator {
    local: NodeId,
    config: DeployConfig,
    breakers: Arc<CircuitBreakerRegistry>,
    registry: Arc<WorkerNodeRegistry>,
    tasks: TaskStateCache,
    updater: TaskUpdater,
    discovery: Arc<dyn NodeDiscovery>,
    transport: Arc<dyn Transport>,
    worker: Arc<ModelWorker>,
    sync: Arc<SyncBroadcaster>,
    outcomes: broadcast::Sender<TaskOutcome>,
    redeploy_attempts: DashMap<ModelId, u32>,
}

impl DeploymentCoordinator {
    pub fn new(
        config: DeployConfig,
        services: &NodeServices,
        registry: Arc<WorkerNodeRegistry>,
        worker: Arc<ModelWorker>,
        sync: Arc<SyncBroadcaster>,
    ) -> Self {
        let updater = TaskUpdater::new(
            services.store.clone(),
            config.task_update_timeout(),
            config.task_update_retries,
        );
        let (outcomes, _) = broadcast::channel(OUTCOME_CAPACITY);

        Self {
            local: services.discovery.local_node_id(),
            config,
            breakers: services.breakers.clone(),
            registry,
            tasks: TaskStateCache::new(),
            updater,
            discovery: services.discovery.clone(),
            transport: services.transport.clone(),
            worker,
            sync,
            outcomes,
            redeploy_attempts: DashMap::new(),
        }
    }

    // --- Load ---

    pub async fn load_model(
        self: &Arc<Self>,
        request: LoadModelRequest,
    ) -> Result<LoadModelResponse, DeployError> {
        let model_id = request.model_id;
        if model_id.0.trim().is_empty() {
            return Err(DeployError::InvalidRequest("model id is empty".to_string()));
        }
        if let Some(name) = self.breakers.check_open()? {
            return Err(DeployError::CircuitBreakerOpen { name });
        }

        let deploy_to_all_nodes = request.node_ids.as_ref().is_none_or(|ids| ids.is_empty());
        let prior_workers = self.registry.get_worker_nodes(&model_id);
        let targets = self.select_targets(&model_id, request.node_ids)?;

        let limit = self.config.max_deploy_tasks;
        if self.tasks.running_count(TaskType::LoadModel) >= limit {
            return Err(DeployError::TaskLimitExceeded {
                task_type: TaskType::LoadModel,
                limit,
            });
        }

        let task = Task::new(TaskType::LoadModel, model_id.clone(), targets.clone());
        let task_id = self
            .updater
            .store()
            .create_task(&task)
            .await
            .map_err(|e| DeployError::Persistence(e.to_string()))?;

        if let Err(e) = self.tasks.add(
            task_id.clone(),
            TaskType::LoadModel,
            model_id.clone(),
            &targets,
            &prior_workers,
            Some(limit),
            self.config.task_timeout(),
        ) {
            let error = match e {
                CacheError::LimitExceeded { task_type, limit } => {
                    DeployError::TaskLimitExceeded { task_type, limit }
                }
                other => DeployError::Persistence(other.to_string()),
            };
            let update = TaskUpdate::terminal(TaskState::Failed, Some(error.to_string()));
            if let Err(e) = self.updater.update(&task_id, update, true).await {
                tracing::error!("Failed to mark rejected task {} as failed: {}", task_id, e);
            }
            return Err(error);
        }

        self.sync
            .broadcast(SyncEvent::admitted(
                model_id.clone(),
                DeployPlan {
                    target_nodes: targets.clone(),
                    deploy_to_all_nodes,
                },
            ))
            .await;
        if let Err(e) = self
            .updater
            .update(&task_id, TaskUpdate::state(TaskState::Running), false)
            .await
        {
            tracing::warn!("Failed to mark task {} as running: {}", task_id, e);
        }
        tracing::info!(
            "Created load task {} for model {} on {} node(s): {:?}",
            task_id,
            model_id,
            targets.len(),
            targets
        );

        let coordinator = self.clone();
        let dispatch_id = task_id.clone();
        tokio::spawn(async move {
            coordinator.dispatch_load(dispatch_id, model_id, targets).await;
        });

        Ok(LoadModelResponse {
            task_id,
            state: TaskState::Created,
        })
    }

    fn select_targets(
        &self,
        model_id: &ModelId,
        requested: Option<Vec<NodeId>>,
    ) -> Result<Vec<NodeId>, DeployError> {
        let criteria = EligibilityCriteria {
            only_ml_nodes: self.config.only_run_on_ml_node,
        };
        let eligible = self.discovery.eligible_nodes(&criteria);

        let targets: Vec<NodeId> = match requested {
            Some(requested) if !requested.is_empty() => {
                if !self.config.allow_custom_deployment_plan {
                    return Err(DeployError::InvalidRequest(
                        "Custom deployment plan is not allowed".to_string(),
                    ));
                }
                let requested: BTreeSet<NodeId> = requested.into_iter().collect();
                let outside: Vec<NodeId> = self
                    .registry
                    .get_worker_nodes(model_id)
                    .into_iter()
                    .filter(|node_id| !requested.contains(node_id))
                    .collect();
                if !outside.is_empty() {
                    return Err(DeployError::InvalidRequest(format!(
                        "Model already deployed to these nodes: {:?}, but they are not included in target node ids. \
                         Undeploy the model from these nodes if the new plan doesn't include them.",
                        outside
                    )));
                }
                eligible
                    .into_iter()
                    .filter(|node_id| requested.contains(node_id))
                    .collect()
            }
            _ => eligible,
        };

        if targets.is_empty() {
            return Err(DeployError::NoEligibleNodes);
        }
        Ok(targets)
    }

    async fn dispatch_load(&self, task_id: TaskId, model_id: ModelId, targets: Vec<NodeId>) {
        let message = NodeMessage::LoadCommand {
            task_id: task_id.clone(),
            model_id: model_id.clone(),
            coordinator: self.local.clone(),
        };

        for (node_id, result) in self.fan_out(&targets, message).await {
            let error = match result {
                Ok(NodeReply::Ack) => continue,
                Ok(NodeReply::Rejected { reason }) => reason,
                Ok(other) => format!("unexpected reply to load command: {:?}", other),
                Err(e) => {
                    tracing::warn!("Failed to dispatch task {} to {}: {}", task_id, node_id, e);
                    e.to_string()
                }
            };
            self.on_load_done(LoadDone {
                task_id: task_id.clone(),
                model_id: model_id.clone(),
                worker_node_id: node_id,
                error: Some(error),
            })
            .await;
        }
    }

    /// Handles one node's completion report. Reports for tasks that are no
    /// longer tracked, and repeated reports, change nothing.
    pub async fn on_load_done(&self, report: LoadDone) {
        let result =
            self.tasks
                .record_node_done(&report.task_id, &report.worker_node_id, report.error.clone());

        match result {
            NodeReport::UnknownTask => {
                tracing::debug!(
                    "Ignoring completion from {} for unknown task {}",
                    report.worker_node_id,
                    report.task_id
                );
                return;
            }
            NodeReport::NotExpected => {
                tracing::debug!(
                    "Ignoring repeated or unexpected completion from {} for task {}",
                    report.worker_node_id,
                    report.task_id
                );
                return;
            }
            _ => {}
        }

        if report.error.is_none() {
            self.sync
                .broadcast(SyncEvent::added(
                    report.model_id.clone(),
                    vec![report.worker_node_id.clone()],
                ))
                .await;
        }

        match result {
            NodeReport::Pending { remaining } => {
                tracing::debug!(
                    "Task {}: {} reported, {} node(s) remaining",
                    report.task_id,
                    report.worker_node_id,
                    remaining
                );
            }
            NodeReport::Finished(outcome) => self.finish_task(outcome).await,
            _ => {}
        }
    }

    async fn finish_task(&self, outcome: TaskOutcome) {
        tracing::info!(
            "Task {} for model {} finished as {:?} ({} succeeded, {} failed)",
            outcome.task_id,
            outcome.model_id,
            outcome.state,
            outcome.succeeded.len(),
            outcome.errors.len()
        );

        self.sync
            .broadcast(SyncEvent::state(outcome.model_id.clone(), outcome.model_state))
            .await;

        let update = TaskUpdate::terminal(outcome.state, outcome.error_summary());
        if let Err(e) = self.updater.update(&outcome.task_id, update, true).await {
            tracing::error!("Failed to persist final state of task {}: {}", outcome.task_id, e);
        }

        // Nobody waiting is fine.
        let _ = self.outcomes.send(outcome);
    }

    /// Waits until the persisted task reaches a terminal state, or `timeout`
    /// elapses. Returns the task as last read from the store.
    pub async fn wait_for_task(&self, task_id: &TaskId, timeout: Duration) -> Result<Option<Task>> {
        let mut outcomes = self.outcomes.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let task = self.updater.store().get_task(task_id).await?;
            match &task {
                None => return Ok(None),
                Some(stored) if stored.state.is_done() => return Ok(task),
                Some(_) => {}
            }

            match tokio::time::timeout_at(deadline, outcomes.recv()).await {
                Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => return Ok(task),
            }
        }
    }

    // --- Unload ---

    /// Unloads models from the targeted nodes (all nodes by default) and
    /// syncs the removals cluster-wide.
    pub async fn unload_models(
        &self,
        request: UnloadModelsRequest,
    ) -> Result<UnloadModelsResponse, DeployError> {
        let targets = match request.node_ids {
            Some(node_ids) if !node_ids.is_empty() => node_ids,
            _ => self.discovery.all_nodes(),
        };
        if targets.is_empty() {
            return Err(DeployError::NoEligibleNodes);
        }
        tracing::info!("Unloading {:?} from {} node(s)", request.model_ids, targets.len());

        let message = NodeMessage::UnloadCommand {
            model_ids: request.model_ids,
        };
        let mut response = UnloadModelsResponse::default();
        let mut removed: BTreeMap<ModelId, Vec<NodeId>> = BTreeMap::new();

        for (node_id, result) in self.fan_out(&targets, message).await {
            match result {
                Ok(NodeReply::UnloadResult { statuses, .. }) => {
                    let mut reported = BTreeMap::new();
                    for (model_id, status) in statuses {
                        if matches!(status, UnloadStatus::Unloaded | UnloadStatus::NotFound) {
                            removed.entry(model_id.clone()).or_default().push(node_id.clone());
                        }
                        if status != UnloadStatus::NotFound {
                            reported.insert(model_id, status);
                        }
                    }
                    if !reported.is_empty() {
                        response.nodes.insert(node_id, reported);
                    }
                }
                Ok(other) => {
                    response.failures.insert(
                        node_id,
                        format!("unexpected reply to unload command: {:?}", other),
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to unload on {}: {}", node_id, e);
                    response.failures.insert(node_id, e.to_string());
                }
            }
        }

        if !removed.is_empty() {
            let mut event = SyncEvent {
                removed_worker_nodes: removed,
                ..Default::default()
            };
            self.registry.apply_sync(&event);
            for model_id in event.removed_worker_nodes.keys() {
                if self.registry.get_worker_nodes(model_id).is_empty() {
                    event.model_states.insert(model_id.clone(), ModelState::Unloaded);
                }
            }
            self.sync.broadcast(event).await;
        }

        Ok(response)
    }

    // --- Cache refresh ---

    /// Pushes a cache refresh to the model's worker nodes (or `node_ids`).
    /// Worker sets are untouched, so nothing is synced.
    pub async fn refresh_model_cache(
        &self,
        model_id: &ModelId,
        node_ids: Option<Vec<NodeId>>,
        predictor_only: bool,
    ) -> Result<RefreshResponse, DeployError> {
        let targets = match node_ids {
            Some(node_ids) if !node_ids.is_empty() => node_ids,
            _ => self.registry.get_worker_nodes(model_id),
        };
        if targets.is_empty() {
            return Err(DeployError::InvalidRequest(format!(
                "Model {} is not deployed on any node",
                model_id
            )));
        }

        let message = NodeMessage::RefreshCache {
            model_id: model_id.clone(),
            predictor_only,
        };
        let mut response = RefreshResponse::default();
        for (node_id, result) in self.fan_out(&targets, message).await {
            match result {
                Ok(NodeReply::RefreshResult { error: None, .. }) => response.refreshed.push(node_id),
                Ok(NodeReply::RefreshResult {
                    error: Some(error), ..
                }) => {
                    response.failures.insert(node_id, error);
                }
                Ok(other) => {
                    response.failures.insert(
                        node_id,
                        format!("unexpected reply to refresh command: {:?}", other),
                    );
                }
                Err(e) => {
                    response.failures.insert(node_id, e.to_string());
                }
            }
        }
        Ok(response)
    }

    // --- Failure handling ---

    /// Force-closes every task past its deadline and unloads the model from
    /// the nodes that loaded it for this task. Nodes that already served the
    /// model before the task keep it. Returns the number of tasks closed.
    pub async fn sweep_expired(&self) -> usize {
        let reason = format!("task timed out after {:?}", self.config.task_timeout());
        let mut closed = 0;

        for task_id in self.tasks.expired(Instant::now()) {
            let Some(outcome) = self.tasks.force_close(&task_id, &reason) else {
                continue;
            };
            closed += 1;
            tracing::warn!(
                "Force-closed expired task {} for model {}",
                task_id,
                outcome.model_id
            );

            let model_id = outcome.model_id.clone();
            let newly_loaded: Vec<NodeId> = outcome
                .succeeded
                .iter()
                .filter(|node_id| !outcome.prior_workers.contains(node_id))
                .cloned()
                .collect();
            self.finish_task(outcome).await;

            if !newly_loaded.is_empty() {
                self.rollback_load(&model_id, &newly_loaded).await;
            }
        }
        closed
    }

    async fn rollback_load(&self, model_id: &ModelId, node_ids: &[NodeId]) {
        let message = NodeMessage::UnloadCommand {
            model_ids: vec![model_id.clone()],
        };
        let mut unloaded = Vec::new();
        for (node_id, result) in self.fan_out(node_ids, message).await {
            match result {
                Ok(NodeReply::UnloadResult { statuses, .. })
                    if statuses.get(model_id).is_some_and(|status| {
                        matches!(status, UnloadStatus::Unloaded | UnloadStatus::NotFound)
                    }) =>
                {
                    unloaded.push(node_id)
                }
                other => tracing::warn!(
                    "Could not roll back model {} on {}: {:?}",
                    model_id,
                    node_id,
                    other.map_err(|e| e.to_string())
                ),
            }
        }
        if !unloaded.is_empty() {
            self.sync
                .broadcast(SyncEvent::removed(model_id.clone(), unloaded))
                .await;
        }
    }

    /// Drops a departed node from every worker set and fails its part of
    /// every task still waiting on it.
    pub async fn on_node_left(&self, node_id: &NodeId) {
        tracing::warn!("Node {} left the cluster", node_id);
        self.registry.remove_node(node_id);
        for outcome in self.tasks.fail_node(node_id, NODE_LEFT_ERROR) {
            self.finish_task(outcome).await;
        }
    }

    /// Reacts to a node joining: drops models from nodes that may no longer
    /// run them, then redeploys models whose plan covers the new node. Only
    /// the lowest-id live node acts.
    pub async fn on_node_joined(self: &Arc<Self>, node_id: &NodeId) {
        if self.discovery.all_nodes().first() != Some(&self.local) {
            tracing::debug!("Node {} joined; redeploy is handled by another node", node_id);
            return;
        }

        if self.config.only_run_on_ml_node {
            self.undeploy_from_ineligible_nodes().await;
        }
        if !self.config.auto_redeploy_enabled {
            tracing::info!("Node {} joined; auto redeploy is disabled", node_id);
            return;
        }

        for model_id in self.registry.model_ids() {
            if let Err(e) = self.redeploy(&model_id, node_id).await {
                tracing::error!("Auto redeploy of model {} failed: {}", model_id, e);
            }
        }
    }

    async fn redeploy(self: &Arc<Self>, model_id: &ModelId, joined: &NodeId) -> Result<(), DeployError> {
        let view = self.registry.view(model_id);
        if !matches!(
            view.state,
            ModelState::Loading | ModelState::PartiallyLoaded | ModelState::Loaded
        ) {
            return Ok(());
        }

        let attempts = self.redeploy_attempts.get(model_id).map(|n| *n).unwrap_or(0);
        if attempts >= self.config.auto_redeploy_max_retries {
            tracing::debug!("Model {} used up its {} redeploy attempt(s)", model_id, attempts);
            return Ok(());
        }

        let node_ids = if view.deploy_to_all_nodes || !self.config.allow_custom_deployment_plan {
            None
        } else if view.target_nodes.contains(joined) {
            Some(view.target_nodes)
        } else {
            tracing::debug!(
                "Model {} is planned on {:?}; not redeploying for {}",
                model_id,
                view.target_nodes,
                joined
            );
            return Ok(());
        };

        *self.redeploy_attempts.entry(model_id.clone()).or_insert(0) += 1;
        let response = self
            .load_model(LoadModelRequest {
                model_id: model_id.clone(),
                node_ids,
            })
            .await?;
        tracing::info!(
            "Triggered auto redeploy of model {} after {} joined, task {}",
            model_id,
            joined,
            response.task_id
        );
        Ok(())
    }

    /// Unloads every model served by a live node that is not eligible to run
    /// models.
    async fn undeploy_from_ineligible_nodes(&self) {
        let criteria = EligibilityCriteria { only_ml_nodes: true };
        let eligible: BTreeSet<NodeId> = self.discovery.eligible_nodes(&criteria).into_iter().collect();
        let alive: BTreeSet<NodeId> = self.discovery.all_nodes().into_iter().collect();

        let mut by_node: BTreeMap<NodeId, Vec<ModelId>> = BTreeMap::new();
        for model_id in self.registry.model_ids() {
            for node_id in self.registry.get_worker_nodes(&model_id) {
                if alive.contains(&node_id) && !eligible.contains(&node_id) {
                    by_node.entry(node_id).or_default().push(model_id.clone());
                }
            }
        }

        for (node_id, model_ids) in by_node {
            tracing::info!("Undeploying {:?} from non-ML node {}", model_ids, node_id);
            let request = UnloadModelsRequest {
                model_ids,
                node_ids: Some(vec![node_id.clone()]),
            };
            match self.unload_models(request).await {
                Ok(response) if response.failures.is_empty() => {}
                Ok(response) => {
                    tracing::warn!("Undeploy from {} failed: {:?}", node_id, response.failures)
                }
                Err(e) => tracing::warn!("Undeploy from {} failed: {}", node_id, e),
            }
        }
    }

    // --- Background loops ---

    pub async fn run_forward_loop(self: Arc<Self>, mut reports: mpsc::UnboundedReceiver<LoadDone>) {
        while let Some(report) = reports.recv().await {
            self.on_load_done(report).await;
        }
        tracing::debug!("Local forward channel closed");
    }

    pub async fn run_sweep(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let closed = self.sweep_expired().await;
            if closed > 0 {
                tracing::info!("Sweep closed {} expired task(s)", closed);
            }
        }
    }

    // --- Queries ---

    pub fn get_model(&self, model_id: &ModelId) -> ModelView {
        self.registry.view(model_id)
    }

    pub async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>> {
        self.updater.store().get_task(task_id).await
    }

    pub fn in_flight_tasks(&self) -> usize {
        self.tasks.len()
    }

    async fn deliver(&self, node_id: &NodeId, message: NodeMessage) -> Result<NodeReply> {
        if *node_id == self.local {
            return Ok(self.worker.handle_command(message).await);
        }
        self.transport.send_to_node(node_id, message).await
    }

    async fn fan_out(
        &self,
        node_ids: &[NodeId],
        message: NodeMessage,
    ) -> Vec<(NodeId, Result<NodeReply>)> {
        let sends = node_ids.iter().map(|node_id| {
            let message = message.clone();
            async move { (node_id.clone(), self.deliver(node_id, message).await) }
        });
        futures::future::join_all(sends).await
    }
}
