//! # Task Types
//!
//! A task moves through `Queued -> Running -> {Completed | Failed}` and never
//! leaves a terminal state. The coordinator owns every [`Task`] record;
//! workers only ever see the [`TaskRequest`] projection of it.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::TaskError;
use crate::protocol::WorkerId;

/// Unique identifier assigned to a task at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a caller hands to the pool.
///
/// `kind` is an opaque discriminator the handler uses to decide what to do,
/// `data` is the payload and `options` carries per-task knobs. The pool never
/// looks inside any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: String,
    pub data: Value,
    pub options: Value,
}

impl TaskSpec {
    /// Create a spec with empty options.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            options: Value::Null,
        }
    }

    /// Attach per-task options.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

/// The portion of a task a worker receives in an `execute-task` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: TaskId,
    pub kind: String,
    pub payload: Value,
    pub options: Value,
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Submitted, waiting for a worker
    Queued,
    /// Assigned to a worker and executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Whether the task has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Coordinator-side record of a submitted task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub kind: String,
    pub payload: Value,
    pub options: Value,
    pub status: TaskStatus,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    /// Set iff the task has been assigned (running or terminal).
    pub worker_id: Option<WorkerId>,
    /// Wall time between assignment and the terminal event.
    pub execution_time: Option<Duration>,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
}

impl Task {
    /// Build a queued task from a caller's spec.
    pub fn queued(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            kind: spec.kind,
            payload: spec.data,
            options: spec.options,
            status: TaskStatus::Queued,
            created_at: SystemTime::now(),
            started_at: None,
            completed_at: None,
            worker_id: None,
            execution_time: None,
            result: None,
            error: None,
        }
    }

    /// Project the task into the message a worker executes.
    pub fn request(&self) -> TaskRequest {
        TaskRequest {
            id: self.id,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            options: self.options.clone(),
        }
    }

    /// Transition `Queued -> Running` on the given worker.
    pub fn mark_running(&mut self, worker_id: WorkerId) {
        self.status = TaskStatus::Running;
        self.started_at = Some(SystemTime::now());
        self.worker_id = Some(worker_id);
    }

    /// Transition `Running -> Completed`.
    pub fn mark_completed(&mut self, result: Value, execution_time: Duration) {
        self.status = TaskStatus::Completed;
        self.completed_at = Some(SystemTime::now());
        self.execution_time = Some(execution_time);
        self.result = Some(result);
    }

    /// Transition `Running -> Failed`.
    pub fn mark_failed(&mut self, error: TaskError, execution_time: Duration) {
        self.status = TaskStatus::Failed;
        self.completed_at = Some(SystemTime::now());
        self.execution_time = Some(execution_time);
        self.error = Some(error);
    }
}
