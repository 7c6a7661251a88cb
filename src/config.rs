//! Node Configuration
//!
//! All tunables of an ML node, loadable from a TOML file. Every field has a
//! default so an empty file (or no file at all) yields a working node; CLI
//! flags in the binary override the network section.

use crate::cluster::types::NodeRole;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Gossip (UDP) bind address. HTTP listens on port + 1000.
    pub bind_addr: SocketAddr,
    pub seed_nodes: Vec<SocketAddr>,
    pub roles: Vec<NodeRole>,
    pub deploy: DeployConfig,
    pub breakers: BreakerConfig,
    pub sync: SyncConfig,
    pub transport: TransportConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            seed_nodes: Vec::new(),
            roles: vec![NodeRole::Data, NodeRole::Ml],
            deploy: DeployConfig::default(),
            breakers: BreakerConfig::default(),
            sync: SyncConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }
}

/// Deployment and task bookkeeping limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Deadline of an in-flight task before the sweep force-closes it.
    pub task_timeout_secs: u64,
    /// How long a task write waits for the per-task write slot.
    pub task_update_timeout_ms: u64,
    pub task_update_retries: usize,
    /// Concurrent load tasks a coordinator accepts.
    pub max_deploy_tasks: usize,
    pub allow_custom_deployment_plan: bool,
    pub only_run_on_ml_node: bool,
    pub sweep_interval_secs: u64,
    /// Redeploy running models onto nodes that join the cluster.
    pub auto_redeploy_enabled: bool,
    /// Lifetime cap on automatic redeploys per model.
    pub auto_redeploy_max_retries: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            task_timeout_secs: 600,
            task_update_timeout_ms: 5000,
            task_update_retries: 3,
            max_deploy_tasks: 10,
            allow_custom_deployment_plan: true,
            only_run_on_ml_node: true,
            sweep_interval_secs: 10,
            auto_redeploy_enabled: true,
            auto_redeploy_max_retries: 3,
        }
    }
}

impl DeployConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn task_update_timeout(&self) -> Duration {
        Duration::from_millis(self.task_update_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub memory_threshold_percent: f64,
    pub native_memory_threshold_percent: f64,
    /// Disk breaker opens when free space drops below this many GB.
    pub disk_free_threshold_gb: f64,
    pub disk_path: PathBuf,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            memory_threshold_percent: 85.0,
            native_memory_threshold_percent: 90.0,
            disk_free_threshold_gb: 5.0,
            disk_path: PathBuf::from("/"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Periodic full snapshot of who serves what.
    pub full_sync_enabled: bool,
    pub full_sync_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_sync_enabled: true,
            full_sync_interval_secs: 10,
        }
    }
}

impl SyncConfig {
    pub fn full_sync_interval(&self) -> Duration {
        Duration::from_secs(self.full_sync_interval_secs.max(1))
    }
}

/// Node-to-node HTTP calls.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub request_timeout_ms: u64,
    pub attempts: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            attempts: 3,
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = NodeConfig::default();

        assert_eq!(config.deploy.task_timeout(), Duration::from_secs(600));
        assert_eq!(config.deploy.task_update_timeout(), Duration::from_millis(5000));
        assert_eq!(config.deploy.max_deploy_tasks, 10);
        assert!(config.deploy.allow_custom_deployment_plan);
        assert_eq!(config.breakers.memory_threshold_percent, 85.0);
        assert_eq!(config.breakers.disk_path, PathBuf::from("/"));
        assert!(config.deploy.auto_redeploy_enabled);
        assert_eq!(config.deploy.auto_redeploy_max_retries, 3);
        assert_eq!(config.transport.request_timeout(), Duration::from_millis(5000));
        assert_eq!(config.transport.attempts, 3);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = NodeConfig::from_toml(
            r#"
            roles = ["ml"]

            [deploy]
            max_deploy_tasks = 2

            [breakers]
            disk_free_threshold_gb = 1.5
            "#,
        )
        .unwrap();

        assert_eq!(config.roles, vec![NodeRole::Ml]);
        assert_eq!(config.deploy.max_deploy_tasks, 2);
        assert_eq!(config.deploy.task_update_retries, 3);
        assert_eq!(config.breakers.disk_free_threshold_gb, 1.5);
        assert_eq!(config.breakers.native_memory_threshold_percent, 90.0);
        assert!(config.sync.full_sync_enabled);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_addr = \"127.0.0.1:7000\"").unwrap();
        writeln!(file, "[sync]").unwrap();
        writeln!(file, "full_sync_enabled = false").unwrap();

        let config = NodeConfig::load(file.path()).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:7000".parse::<SocketAddr>().unwrap());
        assert!(!config.sync.full_sync_enabled);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(NodeConfig::load(Path::new("/definitely/not/here.toml")).is_err());
    }
}
