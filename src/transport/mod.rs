//! Node-to-Node Transport
//!
//! ## Submodules
//! - **`protocol`**: the tagged `NodeMessage` / `NodeReply` message set.
//! - **`http`**: production transport, JSON over HTTP with retry and jittered backoff.
//! - **`local`**: in-process transport that routes straight to registered handlers,
//!   used to run several nodes inside one process.

pub mod http;
pub mod local;
pub mod protocol;

pub use http::HttpTransport;
pub use local::LocalTransport;
pub use protocol::{LoadDone, NodeMessage, NodeReply};

use crate::cluster::types::NodeId;

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to_node(&self, node_id: &NodeId, message: NodeMessage) -> Result<NodeReply>;

    /// Sends `message` to every node concurrently and returns each node's
    /// reply or failure, in the order of `node_ids`.
    async fn broadcast(
        &self,
        node_ids: &[NodeId],
        message: NodeMessage,
    ) -> Vec<(NodeId, Result<NodeReply>)> {
        let sends = node_ids.iter().map(|node_id| {
            let message = message.clone();
            async move { (node_id.clone(), self.send_to_node(node_id, message).await) }
        });
        futures::future::join_all(sends).await
    }
}

/// Receiving side of the transport.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: NodeMessage) -> Result<NodeReply>;
}

#[cfg(test)]
mod tests;
