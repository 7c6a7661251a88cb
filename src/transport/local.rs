//! In-process transport.
//!
//! Messages are JSON round-tripped before delivery so that everything sent
//! through here would also survive the HTTP transport.

use super::protocol::{NodeMessage, NodeReply};
use super::{MessageHandler, Transport};
use crate::cluster::types::NodeId;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct LocalTransport {
    handlers: DashMap<NodeId, Arc<dyn MessageHandler>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, node_id: NodeId, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(node_id, handler);
    }

    /// Makes `node_id` unreachable: sends to it fail from now on.
    pub fn disconnect(&self, node_id: &NodeId) {
        self.handlers.remove(node_id);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn send_to_node(&self, node_id: &NodeId, message: NodeMessage) -> Result<NodeReply> {
        let handler = self
            .handlers
            .get(node_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| anyhow::anyhow!("Node {} is unreachable", node_id))?;

        let message: NodeMessage = serde_json::from_value(serde_json::to_value(&message)?)?;
        let reply = handler.handle(message).await?;
        Ok(serde_json::from_value(serde_json::to_value(&reply)?)?)
    }
}
