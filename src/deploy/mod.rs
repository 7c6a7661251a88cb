//! Distributed Model Deployment
//!
//! Loads and unloads models across the cluster and keeps every node's view
//! of "who serves what" converging.
//!
//! ## Components
//! - **`coordinator`**: `DeploymentCoordinator`, owner of in-flight tasks. Picks targets,
//!   dispatches, gathers per-node results and drives task and model state to
//!   a terminal value.
//! - **`worker`**: `ModelWorker`, the node-side executor of load/unload/refresh commands.
//! - **`forward`**: `ForwardChannel`, the worker -> coordinator completion path.
//! - **`sync`**: `SyncBroadcaster`, worker-set deltas and periodic full snapshots.
//! - **`node`**: `MlNode`, wiring the above and dispatching incoming `NodeMessage`s.
//! - **`handlers`**: axum routes for the deployment API and the internal message endpoint.

pub mod coordinator;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod node;
pub mod protocol;
pub mod sync;
pub mod worker;

pub use coordinator::DeploymentCoordinator;
pub use error::DeployError;
pub use node::{MlNode, NodeServices};
