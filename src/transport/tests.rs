//! Transport Module Tests
//!
//! ## Test Scopes
//! - **Protocol**: tag layout of the JSON wire format.
//! - **Local transport**: delivery, unreachable nodes, broadcast fan-out.
//! - **HTTP transport**: unknown members fail before any request is made; silent peers
//!   fail after the configured timeout and attempts.

#[cfg(test)]
mod tests {
    use crate::cluster::discovery::StaticDiscovery;
    use crate::cluster::types::NodeId;
    use crate::executor::host::UnloadStatus;
    use crate::registry::types::{ModelId, SyncEvent};
    use crate::task::types::TaskId;
    use crate::transport::protocol::{LoadDone, NodeMessage, NodeReply};
    use crate::transport::{HttpTransport, LocalTransport, MessageHandler, Transport};
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    /// Records what it receives and answers with its own id.
    struct RecordingHandler {
        node_id: NodeId,
        received: Mutex<Vec<NodeMessage>>,
    }

    impl RecordingHandler {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                node_id: NodeId::from(id),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle(&self, message: NodeMessage) -> Result<NodeReply> {
            self.received.lock().push(message.clone());
            match message {
                NodeMessage::LocalModels => Ok(NodeReply::LocalModels {
                    node_id: self.node_id.clone(),
                    model_ids: vec![ModelId::from("m")],
                }),
                _ => Ok(NodeReply::Ack),
            }
        }
    }

    // ============================================================
    // PROTOCOL
    // ============================================================

    #[test]
    fn test_messages_are_tagged_by_kind() {
        let done = NodeMessage::LoadDone(LoadDone {
            task_id: TaskId("t1".into()),
            model_id: ModelId::from("m"),
            worker_node_id: NodeId::from("a"),
            error: Some("boom".into()),
        });

        let json = serde_json::to_value(&done).unwrap();

        assert_eq!(json["kind"], "load_done");
        assert_eq!(json["task_id"], "t1");
        assert_eq!(json["error"], "boom");
        assert_eq!(serde_json::from_value::<NodeMessage>(json).unwrap(), done);
        assert_eq!(
            serde_json::to_value(NodeMessage::LocalModels).unwrap(),
            serde_json::json!({"kind": "local_models"})
        );
    }

    #[test]
    fn test_unload_result_roundtrip() {
        let reply = NodeReply::UnloadResult {
            node_id: NodeId::from("a"),
            statuses: BTreeMap::from([
                (ModelId::from("m1"), UnloadStatus::Unloaded),
                (ModelId::from("m2"), UnloadStatus::Error("busy".into())),
            ]),
        };

        let json = serde_json::to_string(&reply).unwrap();

        assert_eq!(serde_json::from_str::<NodeReply>(&json).unwrap(), reply);
    }

    #[test]
    fn test_sync_message_roundtrip() {
        let message = NodeMessage::Sync(SyncEvent::added(ModelId::from("m"), vec![NodeId::from("a")]));

        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["kind"], "sync");
        assert_eq!(serde_json::from_value::<NodeMessage>(json).unwrap(), message);
    }

    // ============================================================
    // LOCAL TRANSPORT
    // ============================================================

    #[tokio::test]
    async fn test_local_transport_delivers_to_registered_handler() {
        let transport = LocalTransport::new();
        let handler = RecordingHandler::new("a");
        transport.register(NodeId::from("a"), handler.clone());

        let reply = transport
            .send_to_node(&NodeId::from("a"), NodeMessage::LocalModels)
            .await
            .unwrap();

        assert_eq!(
            reply,
            NodeReply::LocalModels {
                node_id: NodeId::from("a"),
                model_ids: vec![ModelId::from("m")],
            }
        );
        assert_eq!(handler.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reports_unreachable_nodes_individually() {
        // ARRANGE
        let transport = LocalTransport::new();
        let a = RecordingHandler::new("a");
        let b = RecordingHandler::new("b");
        transport.register(NodeId::from("a"), a.clone());
        transport.register(NodeId::from("b"), b.clone());
        transport.disconnect(&NodeId::from("b"));

        // ACT
        let targets = vec![NodeId::from("a"), NodeId::from("b"), NodeId::from("c")];
        let results = transport
            .broadcast(&targets, NodeMessage::UnloadCommand { model_ids: vec![] })
            .await;

        // ASSERT
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].0, NodeId::from("a"));
        assert!(results[0].1.is_ok());
        assert!(results[1].1.is_err());
        assert!(results[2].1.is_err());
        assert_eq!(a.received.lock().len(), 1);
        assert!(b.received.lock().is_empty());
    }

    // ============================================================
    // HTTP TRANSPORT
    // ============================================================

    #[tokio::test]
    async fn test_http_transport_rejects_unknown_member() {
        let discovery = Arc::new(StaticDiscovery::new(NodeId::from("self")));
        let transport = HttpTransport::new(discovery);

        let result = transport
            .send_to_node(&NodeId::from("nobody"), NodeMessage::LocalModels)
            .await;

        assert!(result.unwrap_err().to_string().contains("not a known member"));
    }

    #[tokio::test]
    async fn test_http_transport_gives_up_after_configured_timeout() {
        // ARRANGE: a peer that accepts connections but never answers
        let silent = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let discovery = Arc::new(StaticDiscovery::new(NodeId::from("self")));
        discovery.add_node(NodeId::from("silent"), Some(silent.local_addr().unwrap()), vec![]);
        let transport = HttpTransport::new(discovery).with_timeout(Duration::from_millis(100), 1);

        // ACT
        let started = Instant::now();
        let result = transport
            .send_to_node(&NodeId::from("silent"), NodeMessage::LocalModels)
            .await;

        // ASSERT
        assert!(result.is_err());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_secs(3), "took {:?}", elapsed);
    }
}
