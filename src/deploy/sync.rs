//! Worker-set propagation.
//!
//! - **Deltas**: every registry change a coordinator makes is applied locally,
//!   then sent as a `SyncEvent` to all other nodes.
//! - **Full sync**: periodically the lowest-id alive node asks every node which
//!   models it actually has loaded and broadcasts the complete snapshot, which
//!   receivers apply as a replacement. This repairs lost deltas.

use crate::cluster::discovery::NodeDiscovery;
use crate::cluster::types::NodeId;
use crate::executor::host::ModelExecutor;
use crate::registry::types::{ModelId, SyncEvent};
use crate::registry::worker_nodes::WorkerNodeRegistry;
use crate::transport::protocol::{NodeMessage, NodeReply};
use crate::transport::Transport;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub struct SyncBroadcaster {
    local: NodeId,
    registry: Arc<WorkerNodeRegistry>,
    executor: Arc<dyn ModelExecutor>,
    discovery: Arc<dyn NodeDiscovery>,
    transport: Arc<dyn Transport>,
}

impl SyncBroadcaster {
    pub fn new(
        registry: Arc<WorkerNodeRegistry>,
        executor: Arc<dyn ModelExecutor>,
        discovery: Arc<dyn NodeDiscovery>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            local: discovery.local_node_id(),
            registry,
            executor,
            discovery,
            transport,
        }
    }

    fn peers(&self) -> Vec<NodeId> {
        self.discovery
            .all_nodes()
            .into_iter()
            .filter(|node_id| *node_id != self.local)
            .collect()
    }

    /// Applies `event` here and sends it to every other node. Nodes that
    /// cannot be reached are left to the next full sync.
    pub async fn broadcast(&self, event: SyncEvent) {
        if event.is_empty() {
            return;
        }
        self.registry.apply_sync(&event);

        let peers = self.peers();
        if peers.is_empty() {
            return;
        }
        for (node_id, result) in self.transport.broadcast(&peers, NodeMessage::Sync(event)).await {
            if let Err(e) = result {
                tracing::warn!("Failed to sync worker nodes to {}: {}", node_id, e);
            }
        }
    }

    pub fn apply_remote(&self, event: &SyncEvent) {
        tracing::debug!(
            "Applying sync: +{} -{} models, {} state(s), {} plan(s)",
            event.added_worker_nodes.len(),
            event.removed_worker_nodes.len(),
            event.model_states.len(),
            event.deploy_plans.len()
        );
        self.registry.apply_sync(event);
    }

    pub fn apply_full(&self, worker_nodes: &BTreeMap<ModelId, Vec<NodeId>>) {
        self.registry.replace_all(worker_nodes);
    }

    /// Collects what every node has loaded and broadcasts it as a full sync.
    ///
    /// Skipped when any node fails to answer, since its models would
    /// otherwise be erased everywhere.
    pub async fn reconcile(&self) -> anyhow::Result<BTreeMap<ModelId, Vec<NodeId>>> {
        let mut snapshot: BTreeMap<ModelId, Vec<NodeId>> = BTreeMap::new();
        for model_id in self.executor.local_models() {
            snapshot.entry(model_id).or_default().push(self.local.clone());
        }

        let peers = self.peers();
        for (node_id, result) in self.transport.broadcast(&peers, NodeMessage::LocalModels).await {
            match result {
                Ok(NodeReply::LocalModels { model_ids, .. }) => {
                    for model_id in model_ids {
                        snapshot.entry(model_id).or_default().push(node_id.clone());
                    }
                }
                Ok(other) => {
                    return Err(anyhow::anyhow!(
                        "Unexpected reply from {} to local models query: {:?}",
                        node_id,
                        other
                    ));
                }
                Err(e) => {
                    return Err(anyhow::anyhow!("Node {} did not report its models: {}", node_id, e));
                }
            }
        }
        for nodes in snapshot.values_mut() {
            nodes.sort();
        }

        self.registry.replace_all(&snapshot);
        let message = NodeMessage::FullSync {
            worker_nodes: snapshot.clone(),
        };
        for (node_id, result) in self.transport.broadcast(&peers, message).await {
            if let Err(e) = result {
                tracing::warn!("Failed to send full sync to {}: {}", node_id, e);
            }
        }
        tracing::debug!("Full sync broadcast ({} models)", snapshot.len());
        Ok(snapshot)
    }

    /// Runs `reconcile` every `interval` while this node has the lowest id.
    pub async fn run_full_sync(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if self.discovery.all_nodes().first() != Some(&self.local) {
                continue;
            }
            if let Err(e) = self.reconcile().await {
                tracing::warn!("Skipping full sync: {}", e);
            }
        }
    }
}
