use crate::breaker::stats::StatsError;
use crate::task::types::TaskType;

use thiserror::Error;

/// Failures raised to the caller of a deployment operation.
///
/// Everything else (a node failing to load, an unreachable node, a
/// persistence hiccup after dispatch) is reported as task or response data.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Circuit breaker {name} is open, please check your memory and disk usage!")]
    CircuitBreakerOpen { name: String },

    #[error(transparent)]
    ResourceStats(#[from] StatsError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("No eligible node found")]
    NoEligibleNodes,

    #[error("Exceed max {task_type} task limit {limit}")]
    TaskLimitExceeded { task_type: TaskType, limit: usize },

    #[error("Failed to persist task: {0}")]
    Persistence(String),
}
