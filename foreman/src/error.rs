use std::time::Duration;

use thiserror::Error;

use foreman_api::WorkerId;

/// Errors returned to callers of the pool API.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Task queue is full (capacity: {capacity})")]
    QueueFull { capacity: usize },
    #[error("Pool is not running")]
    NotRunning,
    #[error("Timed out after {0:?} waiting for tasks to complete")]
    CompletionTimeout(Duration),
    #[error("Pool stopped while the request was pending")]
    Stopped,
    #[error("No tokio runtime available: {0}")]
    RuntimeUnavailable(String),
}

/// Errors related to worker lifecycle. These never reach callers directly;
/// the coordinator logs them and carries on with fewer workers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkerError {
    #[error("Failed to spawn worker {worker}: {reason}")]
    SpawnFailed { worker: WorkerId, reason: String },
    #[error("Command channel of worker {0} is closed")]
    ChannelClosed(WorkerId),
    #[error("Restart limit ({limit}) exceeded for worker {worker}")]
    RestartLimitExceeded { worker: WorkerId, limit: u32 },
}
