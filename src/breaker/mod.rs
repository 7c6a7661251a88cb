//! Resource Circuit Breakers
//!
//! Gates admission of new work on a node under memory or disk pressure.
//!
//! - **`stats`**: the `ResourceStats` provider trait and the `/proc` backed implementation.
//! - **`breakers`**: memory, disk and native-memory breakers over a stats provider.
//! - **`registry`**: `CircuitBreakerRegistry`, the ordered, name-keyed set queried by
//!   both the coordinator (before dispatch) and the worker (before a local load).

pub mod breakers;
pub mod registry;
pub mod stats;

pub use breakers::CircuitBreaker;
pub use registry::CircuitBreakerRegistry;
pub use stats::{ProcStats, ResourceStats, StatsError};

#[cfg(test)]
mod tests;
