use super::protocol::{ENDPOINT_NODE_MESSAGE, NodeMessage, NodeReply};
use super::Transport;
use crate::cluster::discovery::NodeDiscovery;
use crate::cluster::types::NodeId;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const ATTEMPTS: usize = 3;

/// JSON-over-HTTP transport resolving node addresses through discovery.
pub struct HttpTransport {
    http_client: reqwest::Client,
    discovery: Arc<dyn NodeDiscovery>,
    timeout: Duration,
    attempts: usize,
}

impl HttpTransport {
    pub fn new(discovery: Arc<dyn NodeDiscovery>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            discovery,
            timeout: REQUEST_TIMEOUT,
            attempts: ATTEMPTS,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration, attempts: usize) -> Self {
        self.timeout = timeout;
        self.attempts = attempts.max(1);
        self
    }

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_to_node(&self, node_id: &NodeId, message: NodeMessage) -> Result<NodeReply> {
        let addr = self
            .discovery
            .http_addr(node_id)
            .ok_or_else(|| anyhow::anyhow!("Node {} is not a known member", node_id))?;

        tracing::trace!("Sending {} to {} at {}", message.kind(), node_id, addr);
        let response = self
            .post_with_retry(format!("http://{}{}", addr, ENDPOINT_NODE_MESSAGE), &message)
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Node {} rejected {}: {}",
                node_id,
                message.kind(),
                response.status()
            ));
        }

        Ok(response.json::<NodeReply>().await?)
    }
}
