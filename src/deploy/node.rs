use super::coordinator::DeploymentCoordinator;
use super::forward::ForwardChannel;
use super::sync::SyncBroadcaster;
use super::worker::ModelWorker;
use crate::breaker::registry::CircuitBreakerRegistry;
use crate::cluster::discovery::NodeDiscovery;
use crate::cluster::types::{MembershipEvent, NodeId};
use crate::config::{DeployConfig, SyncConfig};
use crate::executor::host::ModelExecutor;
use crate::registry::worker_nodes::WorkerNodeRegistry;
use crate::task::store::TaskStore;
use crate::transport::protocol::{LoadDone, NodeMessage, NodeReply};
use crate::transport::{MessageHandler, Transport};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// External collaborators a node is built from.
#[derive(Clone)]
pub struct NodeServices {
    pub discovery: Arc<dyn NodeDiscovery>,
    pub transport: Arc<dyn Transport>,
    pub store: Arc<dyn TaskStore>,
    pub executor: Arc<dyn ModelExecutor>,
    pub breakers: Arc<CircuitBreakerRegistry>,
}

/// One ML node: coordinator, worker and sync endpoint sharing a registry.
pub struct MlNode {
    pub node_id: NodeId,
    pub registry: Arc<WorkerNodeRegistry>,
    pub coordinator: Arc<DeploymentCoordinator>,
    pub worker: Arc<ModelWorker>,
    pub sync: Arc<SyncBroadcaster>,
    deploy_config: DeployConfig,
    sync_config: SyncConfig,
    forward_rx: Mutex<Option<mpsc::UnboundedReceiver<LoadDone>>>,
}

impl MlNode {
    pub fn new(deploy_config: DeployConfig, sync_config: SyncConfig, services: NodeServices) -> Arc<Self> {
        let node_id = services.discovery.local_node_id();
        let registry = Arc::new(WorkerNodeRegistry::new());

        let (forward, forward_rx) = ForwardChannel::new(node_id.clone(), services.transport.clone());
        let worker = Arc::new(ModelWorker::new(
            node_id.clone(),
            services.executor.clone(),
            services.breakers.clone(),
            forward,
        ));
        let sync = Arc::new(SyncBroadcaster::new(
            registry.clone(),
            services.executor.clone(),
            services.discovery.clone(),
            services.transport.clone(),
        ));
        let coordinator = Arc::new(DeploymentCoordinator::new(
            deploy_config.clone(),
            &services,
            registry.clone(),
            worker.clone(),
            sync.clone(),
        ));

        Arc::new(Self {
            node_id,
            registry,
            coordinator,
            worker,
            sync,
            deploy_config,
            sync_config,
            forward_rx: Mutex::new(Some(forward_rx)),
        })
    }

    /// Spawns the forward loop, the deadline sweep, the full-sync loop and,
    /// when given, the membership listener.
    pub async fn start(self: Arc<Self>, membership: Option<broadcast::Receiver<MembershipEvent>>) {
        let Some(forward_rx) = self.forward_rx.lock().take() else {
            tracing::warn!("Node {} already started", self.node_id);
            return;
        };
        tracing::info!("Starting ML node {}", self.node_id);

        let coordinator = self.coordinator.clone();
        tokio::spawn(async move { coordinator.run_forward_loop(forward_rx).await });

        let coordinator = self.coordinator.clone();
        let sweep_interval = self.deploy_config.sweep_interval();
        tokio::spawn(async move { coordinator.run_sweep(sweep_interval).await });

        if self.sync_config.full_sync_enabled {
            let sync = self.sync.clone();
            let interval = self.sync_config.full_sync_interval();
            tokio::spawn(async move { sync.run_full_sync(interval).await });
        }

        if let Some(events) = membership {
            let node = self.clone();
            tokio::spawn(async move { node.membership_loop(events).await });
        }
    }

    async fn membership_loop(self: Arc<Self>, mut events: broadcast::Receiver<MembershipEvent>) {
        loop {
            match events.recv().await {
                Ok(MembershipEvent::NodeLeft(node_id)) => self.coordinator.on_node_left(&node_id).await,
                Ok(MembershipEvent::NodeJoined(node_id)) => {
                    tracing::info!("Node {} joined", node_id);
                    self.coordinator.on_node_joined(&node_id).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Missed {} membership events", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

#[async_trait]
impl MessageHandler for MlNode {
    async fn handle(&self, message: NodeMessage) -> Result<NodeReply> {
        tracing::trace!("Node {} received {}", self.node_id, message.kind());
        match message {
            NodeMessage::LoadDone(report) => {
                self.coordinator.on_load_done(report).await;
                Ok(NodeReply::Ack)
            }
            NodeMessage::Sync(event) => {
                self.sync.apply_remote(&event);
                Ok(NodeReply::Ack)
            }
            NodeMessage::FullSync { worker_nodes } => {
                self.sync.apply_full(&worker_nodes);
                Ok(NodeReply::Ack)
            }
            command => Ok(self.worker.handle_command(command).await),
        }
    }
}
