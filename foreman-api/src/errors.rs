//! # Task Error Types
//!
//! Why a single task ended up `Failed`. The coordinator stores the value on the
//! task record; its `Display` text is the human-readable failure message.
//!
//! ## Classification
//! - `Handler`: the payload executor reported a failure
//! - `WorkerFault`: the worker hosting the task hit an uncaught error
//! - `WorkerExited`: the worker terminated while the task was in flight
//! - `Timeout`: the task ran past the worker timeout and its worker was restarted
//! - `WorkerTerminated`: the worker was shut down on purpose with the task in flight
//! - `PoolStopped`: the pool stopped before the task finished

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::WorkerId;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskError {
    #[error("Task handler failed: {0}")]
    Handler(String),

    #[error("Worker error on worker {worker}: {cause}")]
    WorkerFault { worker: WorkerId, cause: String },

    #[error("Worker {worker} exited unexpectedly: {reason}")]
    WorkerExited { worker: WorkerId, reason: String },

    #[error("Task exceeded worker timeout of {timeout:?} on worker {worker}")]
    Timeout { worker: WorkerId, timeout: Duration },

    #[error("Worker {worker} was terminated: {reason}")]
    WorkerTerminated { worker: WorkerId, reason: String },

    #[error("Pool stopped before the task finished")]
    PoolStopped,
}

impl TaskError {
    /// Whether the failure came from the worker rather than the task payload.
    pub fn is_worker_failure(&self) -> bool {
        !matches!(self, TaskError::Handler(_))
    }
}
