//! Worker Node Registry
//!
//! Every node keeps its own copy of "model -> nodes serving it" plus the
//! model lifecycle state. There is no global owner: the coordinator of a
//! task computes the outcome once and broadcasts it as a `SyncEvent`.

pub mod types;
pub mod worker_nodes;

pub use types::{ModelId, ModelState, ModelView, SyncEvent};
pub use worker_nodes::WorkerNodeRegistry;
