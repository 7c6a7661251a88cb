//! Distributed ML Model Deployment Library
//!
//! This library crate defines the modules that let a cluster of nodes load,
//! unload and track machine-learning models. It is the foundation for the
//! node binary (`main.rs`).
//!
//! ## Architecture Modules
//! - **`breaker`**: resource circuit breakers (memory, native memory, disk) that gate
//!   model loading on a node.
//! - **`cluster`**: node identity, UDP gossip membership and the `NodeDiscovery` seam
//!   used to pick eligible nodes.
//! - **`config`**: TOML-backed node configuration.
//! - **`deploy`**: the deployment coordinator, node-side worker, completion forwarding,
//!   worker-set sync and the HTTP API.
//! - **`executor`**: the local model host a worker drives.
//! - **`registry`**: each node's view of which nodes serve which model, and model states.
//! - **`task`**: persisted deployment tasks, serialized task writes and the in-flight
//!   task cache with deadlines.
//! - **`transport`**: node-to-node messages over HTTP, or in-process for tests.

pub mod breaker;
pub mod cluster;
pub mod config;
pub mod deploy;
pub mod executor;
pub mod registry;
pub mod task;
pub mod transport;
