//! Node discovery seam.
//!
//! The deployment core never talks to the gossip layer directly; it asks a
//! `NodeDiscovery` for node ids and addresses. The gossip `MembershipService`
//! implements it for real clusters, `StaticDiscovery` for fixed topologies
//! and in-process clusters.

use super::types::{NodeId, NodeRole};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::SocketAddr;

/// Filter applied when picking load targets.
#[derive(Debug, Clone, Default)]
pub struct EligibilityCriteria {
    /// Only nodes carrying the `ml` role qualify.
    pub only_ml_nodes: bool,
}

pub trait NodeDiscovery: Send + Sync {
    fn local_node_id(&self) -> NodeId;

    /// Every node currently considered alive, local node included.
    fn all_nodes(&self) -> Vec<NodeId>;

    fn eligible_nodes(&self, criteria: &EligibilityCriteria) -> Vec<NodeId>;

    fn http_addr(&self, node_id: &NodeId) -> Option<SocketAddr>;
}

#[derive(Debug, Clone)]
struct StaticMember {
    http_addr: Option<SocketAddr>,
    roles: Vec<NodeRole>,
    alive: bool,
}

/// Discovery over a fixed, explicitly managed member list.
pub struct StaticDiscovery {
    local: NodeId,
    members: RwLock<HashMap<NodeId, StaticMember>>,
}

impl StaticDiscovery {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            members: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_node(&self, node_id: NodeId, http_addr: Option<SocketAddr>, roles: Vec<NodeRole>) {
        self.members.write().insert(
            node_id,
            StaticMember {
                http_addr,
                roles,
                alive: true,
            },
        );
    }

    /// Marks a node dead without forgetting it.
    pub fn mark_dead(&self, node_id: &NodeId) {
        if let Some(member) = self.members.write().get_mut(node_id) {
            member.alive = false;
        }
    }
}

impl NodeDiscovery for StaticDiscovery {
    fn local_node_id(&self) -> NodeId {
        self.local.clone()
    }

    fn all_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .members
            .read()
            .iter()
            .filter(|(_, member)| member.alive)
            .map(|(id, _)| id.clone())
            .collect();
        nodes.sort();
        nodes
    }

    fn eligible_nodes(&self, criteria: &EligibilityCriteria) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .members
            .read()
            .iter()
            .filter(|(_, member)| {
                member.alive && (!criteria.only_ml_nodes || member.roles.contains(&NodeRole::Ml))
            })
            .map(|(id, _)| id.clone())
            .collect();
        nodes.sort();
        nodes
    }

    fn http_addr(&self, node_id: &NodeId) -> Option<SocketAddr> {
        self.members
            .read()
            .get(node_id)
            .and_then(|member| member.http_addr)
    }
}
