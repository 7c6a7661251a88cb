//! Local Model Execution
//!
//! The node-local side of a deployment: the `ModelExecutor` trait the worker
//! drives, and `InMemoryModelHost`, which tracks loaded models and delegates the
//! engine-specific loading to a pluggable async loader.

pub mod host;

pub use host::{InMemoryModelHost, LoadedModel, ModelExecutor, UnloadStatus};
