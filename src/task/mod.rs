//! Task Tracking
//!
//! ## Submodules
//! - **`types`**: persisted `Task` record and its state machine
//!   (`CREATED -> RUNNING -> COMPLETED | COMPLETED_WITH_ERROR | FAILED`).
//! - **`store`**: the `TaskStore` persistence seam, an in-memory store, and the
//!   `TaskUpdater` write guard (bounded slot acquisition, retry with backoff).
//! - **`cache`**: `TaskStateCache`, the ephemeral per-task view of which worker
//!   nodes are still outstanding and which have failed.

pub mod cache;
pub mod store;
pub mod types;

pub use cache::{CacheError, NodeReport, TaskOutcome, TaskStateCache};
pub use store::{MemoryTaskStore, TaskStore, TaskUpdater};
pub use types::{Task, TaskId, TaskState, TaskType, TaskUpdate};

#[cfg(test)]
mod tests;
