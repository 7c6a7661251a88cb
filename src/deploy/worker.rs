use super::forward::ForwardChannel;
use crate::breaker::registry::CircuitBreakerRegistry;
use crate::cluster::types::NodeId;
use crate::executor::host::ModelExecutor;
use crate::registry::types::ModelId;
use crate::task::types::TaskId;
use crate::transport::protocol::{LoadDone, NodeMessage, NodeReply};

use anyhow::Result;
use std::sync::Arc;

/// Executes deployment commands on this node.
///
/// Loads run in the background and report through the `ForwardChannel`;
/// unload, refresh and model listing answer inline.
pub struct ModelWorker {
    node_id: NodeId,
    executor: Arc<dyn ModelExecutor>,
    breakers: Arc<CircuitBreakerRegistry>,
    forward: ForwardChannel,
}

impl ModelWorker {
    pub fn new(
        node_id: NodeId,
        executor: Arc<dyn ModelExecutor>,
        breakers: Arc<CircuitBreakerRegistry>,
        forward: ForwardChannel,
    ) -> Self {
        Self {
            node_id,
            executor,
            breakers,
            forward,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub async fn handle_command(self: &Arc<Self>, message: NodeMessage) -> NodeReply {
        match message {
            NodeMessage::LoadCommand {
                task_id,
                model_id,
                coordinator,
            } => {
                self.spawn_load(task_id, model_id, coordinator);
                NodeReply::Ack
            }
            NodeMessage::UnloadCommand { model_ids } => {
                let statuses = self.executor.unload_local(&model_ids).await;
                NodeReply::UnloadResult {
                    node_id: self.node_id.clone(),
                    statuses,
                }
            }
            NodeMessage::RefreshCache {
                model_id,
                predictor_only,
            } => {
                let error = self
                    .executor
                    .refresh_local_cache(&model_id, !predictor_only)
                    .await
                    .err()
                    .map(|e| e.to_string());
                if let Some(error) = &error {
                    tracing::warn!("Failed to refresh cache of model {}: {}", model_id, error);
                }
                NodeReply::RefreshResult {
                    node_id: self.node_id.clone(),
                    error,
                }
            }
            NodeMessage::LocalModels => NodeReply::LocalModels {
                node_id: self.node_id.clone(),
                model_ids: self.executor.local_models(),
            },
            other => NodeReply::Rejected {
                reason: format!("{} is not a worker command", other.kind()),
            },
        }
    }

    fn spawn_load(self: &Arc<Self>, task_id: TaskId, model_id: ModelId, coordinator: NodeId) {
        let worker = self.clone();
        tokio::spawn(async move {
            tracing::info!("Loading model {} for task {}", model_id, task_id);
            let error = worker.load(&model_id).await.err().map(|e| e.to_string());
            if let Some(error) = &error {
                tracing::warn!("Failed to load model {} for task {}: {}", model_id, task_id, error);
            }

            let report = LoadDone {
                task_id,
                model_id,
                worker_node_id: worker.node_id.clone(),
                error,
            };
            let task_id = report.task_id.clone();
            if let Err(e) = worker.forward.send(&coordinator, report).await {
                tracing::error!(
                    "Failed to forward completion of task {} to {}: {}",
                    task_id,
                    coordinator,
                    e
                );
            }
        });
    }

    async fn load(&self, model_id: &ModelId) -> Result<()> {
        if let Some(name) = self.breakers.check_open()? {
            return Err(anyhow::anyhow!(
                "Circuit breaker {} is open, please check your memory and disk usage!",
                name
            ));
        }
        self.executor.load_local(model_id).await
    }
}
