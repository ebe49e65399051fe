//! # Worker Protocol
//!
//! Closed set of messages exchanged between the coordinator and its workers.
//! Both directions are plain enums so every handler is an exhaustive `match`.
//!
//! ## Message Flow
//! - Coordinator -> worker: [`WorkerCommand`]
//! - Worker -> coordinator: [`WorkerEvent`], wrapped in [`WorkerMessage`]
//!
//! A worker never touches coordinator state; it only ever sends events.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{TaskId, TaskRequest};

/// Logical identity of a worker slot.
///
/// The id survives restarts: a replacement execution unit is created under the
/// same id, while the instance number in [`WorkerMessage`] changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(u64);

impl WorkerId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Settings handed to a worker in its `initialize` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// How long the coordinator lets a single task run before restarting the worker
    pub worker_timeout: Duration,
    /// Free-form settings forwarded to the handler
    pub extra: Value,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            worker_timeout: Duration::from_secs(30),
            extra: Value::Null,
        }
    }
}

/// Commands the coordinator sends to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// First message of every instance; the worker answers with `Ready`.
    Initialize {
        worker_id: WorkerId,
        settings: WorkerSettings,
    },
    /// Run one task and answer with `TaskCompleted` or `TaskFailed`.
    ExecuteTask(TaskRequest),
    /// Best-effort probe; answered with `Stats` and `Health`.
    HealthCheck,
}

impl WorkerCommand {
    /// Wire name of the command, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Initialize { .. } => "initialize",
            WorkerCommand::ExecuteTask(_) => "execute-task",
            WorkerCommand::HealthCheck => "health-check",
        }
    }
}

/// Approximate resource consumption reported by a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_bytes: u64,
    pub cpu_percent: f64,
}

/// Counters a worker reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub uptime: Duration,
    pub resource_usage: ResourceUsage,
}

/// Liveness report a worker sends in answer to a health check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub healthy: bool,
    pub current_task: Option<TaskId>,
    pub resource_usage: ResourceUsage,
}

/// Events a worker (or the execution unit hosting it) sends back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkerEvent {
    /// Initialization finished; the worker can take a task.
    Ready,
    TaskCompleted { task_id: TaskId, result: Value },
    TaskFailed { task_id: TaskId, error: String },
    Stats(WorkerStats),
    Health(WorkerHealth),
    /// Uncaught error inside the execution unit (for instance a handler panic).
    /// The unit is unusable afterwards.
    Fault { error: String },
    /// The execution unit terminated without being asked to.
    Exited { reason: String },
}

impl WorkerEvent {
    /// Wire name of the event, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerEvent::Ready => "worker-ready",
            WorkerEvent::TaskCompleted { .. } => "task-completed",
            WorkerEvent::TaskFailed { .. } => "task-failed",
            WorkerEvent::Stats(_) => "worker-stats",
            WorkerEvent::Health(_) => "worker-health",
            WorkerEvent::Fault { .. } => "worker-error",
            WorkerEvent::Exited { .. } => "worker-exit",
        }
    }
}

/// A [`WorkerEvent`] tagged with the sending worker and its instance number.
///
/// Instance numbers are unique per pool, so events from an instance that has
/// since been replaced can be recognised and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerMessage {
    pub worker_id: WorkerId,
    pub instance: u64,
    pub event: WorkerEvent,
}

impl WorkerMessage {
    pub fn new(worker_id: WorkerId, instance: u64, event: WorkerEvent) -> Self {
        Self {
            worker_id,
            instance,
            event,
        }
    }
}
