use super::discovery::{EligibilityCriteria, NodeDiscovery};
use super::types::{GossipMessage, MembershipEvent, Node, NodeId, NodeRole, NodeState};

use anyhow::Result;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_CAPACITY: usize = 256;

/// HTTP port convention: gossip port + 1000.
pub fn http_addr_for(gossip_addr: SocketAddr) -> SocketAddr {
    SocketAddr::new(gossip_addr.ip(), gossip_addr.port() + 1000)
}

/// SWIM-style gossip membership.
///
/// Keeps the local view of who is alive, and publishes `MembershipEvent`s
/// when a node joins or is declared dead so the deployment layer can
/// drop it from worker sets.
pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    socket: Arc<UdpSocket>,
    incarnation: AtomicU64,
    events: broadcast::Sender<MembershipEvent>,
}

impl MembershipService {
    pub async fn new(
        bind_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
        roles: Vec<NodeRole>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        let gossip_addr = socket.local_addr()?;
        let local_node = Node {
            id: NodeId::new(),
            gossip_addr,
            http_addr: http_addr_for(gossip_addr),
            roles,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        };

        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());

        if !seed_nodes.is_empty() {
            tracing::info!("Joining cluster via {} seed node(s)", seed_nodes.len());
            let encoded = bincode::serialize(&GossipMessage::Join {
                node: local_node.clone(),
            })?;
            for seed in seed_nodes.iter() {
                socket.send_to(&encoded, seed).await?;
                tracing::info!("Sent join request to {}", seed);
            }
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Arc::new(Self {
            local_node,
            members,
            socket: Arc::new(socket),
            incarnation: AtomicU64::new(1),
            events,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.events.subscribe()
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service on {}", self.local_node.gossip_addr);

        let service = self.clone();
        tokio::spawn(async move { service.gossip_loop().await });

        let service = self.clone();
        tokio::spawn(async move { service.receive_loop().await });

        let service = self.clone();
        tokio::spawn(async move { service.failure_detection_loop().await });
    }

    pub fn get_member(&self, node_id: &NodeId) -> Option<Node> {
        self.members.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn publish(&self, event: MembershipEvent) {
        // No subscribers is fine during startup.
        let _ = self.events.send(event);
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let peers: Vec<Node> = self
                .get_alive_members()
                .into_iter()
                .filter(|node| node.id != self.local_node.id)
                .collect();
            if peers.is_empty() {
                continue;
            }

            let target = &peers[rand::random::<usize>() % peers.len()];
            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation: self.incarnation.load(Ordering::SeqCst),
            };
            match bincode::serialize(&msg) {
                Ok(encoded) => {
                    if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                        tracing::warn!("Failed to send ping to {}: {}", target.id, e);
                    }
                }
                Err(e) => tracing::error!("Failed to encode ping: {}", e),
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling gossip from {}: {}", src, e);
                        }
                    }
                    Err(e) => tracing::warn!("Dropping undecodable gossip from {}: {}", src, e),
                },
                Err(e) => {
                    tracing::error!("Failed to receive gossip packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Join { node } => self.merge_member(node),
            GossipMessage::Ping { from, incarnation } => {
                self.touch(&from, incarnation);
                let reply = GossipMessage::Ack {
                    from: self.local_node.id.clone(),
                    incarnation: self.incarnation.load(Ordering::SeqCst),
                    members: self.members.iter().map(|e| e.value().clone()).collect(),
                };
                self.socket.send_to(&bincode::serialize(&reply)?, src).await?;
            }
            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.touch(&from, incarnation);
                for member in members {
                    self.merge_member(member);
                }
            }
            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => self.handle_suspect(node_id, incarnation).await?,
            GossipMessage::Alive {
                node_id,
                incarnation,
            } => self.handle_alive(node_id, incarnation),
        }
        Ok(())
    }

    fn touch(&self, node_id: &NodeId, incarnation: u64) {
        if let Some(mut member) = self.members.get_mut(node_id) {
            member.last_seen = Some(Instant::now());
            if incarnation > member.incarnation {
                member.incarnation = incarnation;
            }
        }
    }

    fn merge_member(&self, mut incoming: Node) {
        if incoming.id == self.local_node.id {
            return;
        }

        let mut rejoined = false;
        match self.members.get_mut(&incoming.id) {
            Some(mut existing) => {
                let refutes = incoming.incarnation == existing.incarnation
                    && incoming.state == NodeState::Alive
                    && existing.state == NodeState::Suspect;
                if incoming.incarnation > existing.incarnation || refutes {
                    rejoined = existing.state == NodeState::Dead && incoming.state == NodeState::Alive;
                    existing.state = incoming.state;
                    existing.incarnation = incoming.incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::info!("Discovered member {} at {}", incoming.id, incoming.gossip_addr);
                incoming.last_seen = Some(Instant::now());
                let joined = incoming.state == NodeState::Alive;
                let id = incoming.id.clone();
                self.members.insert(id.clone(), incoming);
                if joined {
                    self.publish(MembershipEvent::NodeJoined(id));
                }
                return;
            }
        }

        if rejoined {
            self.publish(MembershipEvent::NodeJoined(incoming.id));
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        if node_id == self.local_node.id {
            let refuted = self.incarnation.load(Ordering::SeqCst).max(incarnation) + 1;
            self.incarnation.store(refuted, Ordering::SeqCst);
            if let Some(mut me) = self.members.get_mut(&self.local_node.id) {
                me.incarnation = refuted;
            }
            tracing::info!("Refuting suspicion about myself (inc={})", refuted);
            self.broadcast(GossipMessage::Alive {
                node_id,
                incarnation: refuted,
            })
            .await;
            return Ok(());
        }

        if let Some(mut existing) = self.members.get_mut(&node_id)
            && incarnation >= existing.incarnation
            && existing.state == NodeState::Alive
        {
            tracing::info!("Node {} suspected", node_id);
            existing.state = NodeState::Suspect;
            existing.incarnation = incarnation;
        }
        Ok(())
    }

    fn handle_alive(&self, node_id: NodeId, incarnation: u64) {
        if let Some(mut existing) = self.members.get_mut(&node_id)
            && incarnation > existing.incarnation
        {
            tracing::info!("Node {} is alive again (inc={})", node_id, incarnation);
            existing.state = NodeState::Alive;
            existing.incarnation = incarnation;
            existing.last_seen = Some(Instant::now());
        }
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();
            let mut suspects = Vec::new();
            let mut dead = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();
                if member.id == self.local_node.id {
                    continue;
                }
                let Some(last_seen) = member.last_seen else {
                    member.last_seen = Some(now);
                    continue;
                };
                let elapsed = now.duration_since(last_seen);

                match member.state {
                    NodeState::Alive if elapsed > SUSPECT_TIMEOUT => {
                        tracing::warn!("Node {} suspected (no contact for {:?})", member.id, elapsed);
                        member.state = NodeState::Suspect;
                        suspects.push(GossipMessage::Suspect {
                            node_id: member.id.clone(),
                            incarnation: member.incarnation,
                        });
                    }
                    NodeState::Suspect if elapsed > DEAD_TIMEOUT => {
                        tracing::warn!("Node {} declared dead (no contact for {:?})", member.id, elapsed);
                        member.state = NodeState::Dead;
                        dead.push(member.id.clone());
                    }
                    _ => {}
                }
            }

            for msg in suspects {
                self.broadcast(msg).await;
            }
            for node_id in dead {
                self.publish(MembershipEvent::NodeLeft(node_id));
            }
        }
    }

    async fn broadcast(&self, msg: GossipMessage) {
        let Ok(encoded) = bincode::serialize(&msg) else {
            tracing::error!("Failed to encode gossip broadcast");
            return;
        };
        for node in self.get_alive_members() {
            if node.id == self.local_node.id {
                continue;
            }
            if let Err(e) = self.socket.send_to(&encoded, node.gossip_addr).await {
                tracing::warn!("Failed to broadcast to {}: {}", node.id, e);
            }
        }
    }
}

impl NodeDiscovery for MembershipService {
    fn local_node_id(&self) -> NodeId {
        self.local_node.id.clone()
    }

    fn all_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.get_alive_members().into_iter().map(|n| n.id).collect();
        nodes.sort();
        nodes
    }

    fn eligible_nodes(&self, criteria: &EligibilityCriteria) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .get_alive_members()
            .into_iter()
            .filter(|node| !criteria.only_ml_nodes || node.has_role(NodeRole::Ml))
            .map(|node| node.id)
            .collect();
        nodes.sort();
        nodes
    }

    fn http_addr(&self, node_id: &NodeId) -> Option<std::net::SocketAddr> {
        self.get_member(node_id).map(|node| node.http_addr)
    }
}
