use crate::cluster::types::NodeId;
use crate::transport::protocol::{LoadDone, NodeMessage};
use crate::transport::Transport;

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Carries a worker's `LoadDone` back to the task's coordinator.
///
/// A colocated coordinator gets it over an in-process channel, a remote one
/// through the transport.
pub struct ForwardChannel {
    local: NodeId,
    local_tx: mpsc::UnboundedSender<LoadDone>,
    transport: Arc<dyn Transport>,
}

impl ForwardChannel {
    pub fn new(
        local: NodeId,
        transport: Arc<dyn Transport>,
    ) -> (Self, mpsc::UnboundedReceiver<LoadDone>) {
        let (local_tx, local_rx) = mpsc::unbounded_channel();
        (
            Self {
                local,
                local_tx,
                transport,
            },
            local_rx,
        )
    }

    pub async fn send(&self, coordinator: &NodeId, report: LoadDone) -> Result<()> {
        if *coordinator == self.local {
            tracing::trace!("Forwarding completion of task {} locally", report.task_id);
            return self
                .local_tx
                .send(report)
                .map_err(|_| anyhow::anyhow!("Local coordinator loop has stopped"));
        }

        tracing::debug!(
            "Forwarding completion of task {} to coordinator {}",
            report.task_id,
            coordinator
        );
        self.transport
            .send_to_node(coordinator, NodeMessage::LoadDone(report))
            .await?;
        Ok(())
    }
}
