use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

/// Stable identity of a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// What kind of work a node accepts.
///
/// `Ml` nodes are preferred for model hosting; `Data` nodes only host models
/// when the cluster is not restricted to ML nodes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Data,
    Ml,
}

impl std::str::FromStr for NodeRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "data" => Ok(NodeRole::Data),
            "ml" => Ok(NodeRole::Ml),
            other => Err(anyhow::anyhow!("Unknown node role: {}", other)),
        }
    }
}

/// A single member of the cluster as seen by the local node.
///
/// `incarnation` orders conflicting reports about the same node; a node
/// refutes a false suspicion by bumping its own incarnation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub roles: Vec<NodeRole>,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn has_role(&self, role: NodeRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Membership changes surfaced to the rest of the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    NodeJoined(NodeId),
    NodeLeft(NodeId),
}

/// Gossip wire protocol (bincode over UDP).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Join { node: Node },
    Ping { from: NodeId, incarnation: u64 },
    Ack { from: NodeId, incarnation: u64, members: Vec<Node> },
    Suspect { node_id: NodeId, incarnation: u64 },
    Alive { node_id: NodeId, incarnation: u64 },
}
