//! Cluster Membership & Discovery
//!
//! Tracks which nodes make up the cluster and which of them may host models.
//!
//! ## Core Mechanisms
//! - **Gossip**: `MembershipService` exchanges Ping/Ack/Join/Suspect/Alive over UDP
//!   (bincode-encoded) to keep a converging view of the topology.
//! - **Failure detection**: Alive -> Suspect -> Dead on missed contact; a dead node
//!   is published as `MembershipEvent::NodeLeft`.
//! - **Discovery seam**: the deployment layer only sees the `NodeDiscovery` trait
//!   (`all_nodes`, `eligible_nodes`, `http_addr`), implemented by the gossip service
//!   and by `StaticDiscovery` for fixed topologies.

pub mod discovery;
pub mod membership;
pub mod types;
