use ml_deploy_cluster::breaker::registry::CircuitBreakerRegistry;
use ml_deploy_cluster::breaker::stats::ProcStats;
use ml_deploy_cluster::cluster::membership::{MembershipService, http_addr_for};
use ml_deploy_cluster::cluster::types::NodeRole;
use ml_deploy_cluster::config::NodeConfig;
use ml_deploy_cluster::deploy::handlers::router;
use ml_deploy_cluster::deploy::node::{MlNode, NodeServices};
use ml_deploy_cluster::executor::host::InMemoryModelHost;
use ml_deploy_cluster::task::store::MemoryTaskStore;
use ml_deploy_cluster::transport::HttpTransport;

use anyhow::Context;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const STATS_INTERVAL_SECS: u64 = 30;

fn usage(program: &str) -> ! {
    eprintln!(
        "Usage: {} --bind <addr:port> [--seed <addr:port>]... [--role data|ml]... [--config <file.toml>]",
        program
    );
    eprintln!("Example: {} --bind 127.0.0.1:5000 --role ml", program);
    eprintln!(
        "Example: {} --bind 127.0.0.1:5001 --seed 127.0.0.1:5000",
        program
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("ml-node");

    let mut bind_addr: Option<SocketAddr> = None;
    let mut seed_nodes: Vec<SocketAddr> = vec![];
    let mut roles: Vec<NodeRole> = vec![];
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let Some(value) = args.get(i + 1) else {
            usage(program);
        };
        match flag {
            "--bind" => bind_addr = Some(value.parse().context("invalid --bind address")?),
            "--seed" => seed_nodes.push(value.parse().context("invalid --seed address")?),
            "--role" => roles.push(value.parse()?),
            "--config" => config_path = Some(PathBuf::from(value)),
            _ => usage(program),
        }
        i += 2;
    }

    let mut config = match &config_path {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    match bind_addr {
        Some(addr) => config.bind_addr = addr,
        None if config_path.is_none() => usage(program),
        None => {}
    }
    if !seed_nodes.is_empty() {
        config.seed_nodes = seed_nodes;
    }
    if !roles.is_empty() {
        config.roles = roles;
    }

    tracing::info!("Starting node on {} with roles {:?}", config.bind_addr, config.roles);
    if config.seed_nodes.is_empty() {
        tracing::info!("Starting as seed node (founder)");
    } else {
        tracing::info!("Seed nodes: {:?}", config.seed_nodes);
    }

    // 1. Membership (UDP gossip):
    let membership =
        MembershipService::new(config.bind_addr, config.seed_nodes.clone(), config.roles.clone()).await?;
    tracing::info!("Node ID: {}", membership.local_node.id);
    membership.clone().start().await;

    // 2. Node services:
    let services = NodeServices {
        discovery: membership.clone(),
        transport: Arc::new(
            HttpTransport::new(membership.clone())
                .with_timeout(config.transport.request_timeout(), config.transport.attempts),
        ),
        store: Arc::new(MemoryTaskStore::new()),
        executor: Arc::new(InMemoryModelHost::new()),
        breakers: Arc::new(CircuitBreakerRegistry::with_defaults(
            &config.breakers,
            Arc::new(ProcStats),
        )),
    };

    // 3. Deployment layer:
    let node = MlNode::new(config.deploy.clone(), config.sync.clone(), services);
    node.clone().start(Some(membership.subscribe())).await;

    // 4. Cluster stats reporter:
    let stats_service = membership.clone();
    let stats_node = node.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(STATS_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let alive = stats_service.get_alive_members();
            tracing::info!(
                "Cluster stats: {} alive nodes, {} deployed models, {} in-flight tasks",
                alive.len(),
                stats_node.registry.model_ids().len(),
                stats_node.coordinator.in_flight_tasks()
            );
        }
    });

    // 5. HTTP server:
    let http_addr = http_addr_for(membership.local_node.gossip_addr);
    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, router(node)).await?;

    Ok(())
}
