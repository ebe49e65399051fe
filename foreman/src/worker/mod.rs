//! # Workers
//!
//! Everything about a single worker slot: the coordinator-side bookkeeping
//! ([`WorkerHandle`]), the [`ExecutionUnit`] abstraction that hides how the
//! worker actually runs, the two bundled unit implementations, and the
//! worker-side protocol loop they both host.
//!
//! ## Key Concepts
//! - Slot id vs. instance: a [`WorkerId`] names a slot and survives restarts;
//!   each execution unit spawned for it gets a fresh instance number.
//! - Status: `Initializing -> Ready -> Busy -> Idle -> ...`, with `Error`
//!   and `Terminating` on the way out.

mod runner;
mod thread_unit;
mod tokio_unit;
mod unit;

use std::time::{Duration, Instant};

use serde::Serialize;

use foreman_api::{ResourceUsage, TaskId, WorkerId, WorkerStats};

pub(crate) use runner::panic_message;
pub use runner::run_worker;
pub use thread_unit::{ThreadUnit, ThreadUnitFactory};
pub use tokio_unit::{TokioUnit, TokioUnitFactory};
pub use unit::{EventSender, ExecutionUnit, UnitFactory};

/// Coordinator-side state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerStatus {
    /// Spawned, waiting for `worker-ready`
    Initializing,
    /// Initialized and has not run a task yet
    Ready,
    /// Finished its last task, available
    Idle,
    /// Running a task
    Busy,
    /// Faulted, waiting for restart
    Error,
    /// Being shut down
    Terminating,
}

impl WorkerStatus {
    /// Whether the worker can take a task.
    pub fn is_available(&self) -> bool {
        matches!(self, WorkerStatus::Ready | WorkerStatus::Idle)
    }
}

/// Coordinator bookkeeping for one live execution unit.
#[derive(Debug)]
pub struct WorkerHandle {
    id: WorkerId,
    instance: u64,
    unit: Box<dyn ExecutionUnit>,
    status: WorkerStatus,
    current_task: Option<TaskId>,
    busy_since: Option<Instant>,
    spawned_at: Instant,
    task_count: u64,
    last_activity: Instant,
    restart_count: u32,
    resource_usage: ResourceUsage,
    last_stats: Option<WorkerStats>,
}

impl WorkerHandle {
    pub fn new(id: WorkerId, instance: u64, unit: Box<dyn ExecutionUnit>, restart_count: u32) -> Self {
        let now = Instant::now();
        Self {
            id,
            instance,
            unit,
            status: WorkerStatus::Initializing,
            current_task: None,
            busy_since: None,
            spawned_at: now,
            task_count: 0,
            last_activity: now,
            restart_count,
            resource_usage: ResourceUsage::default(),
            last_stats: None,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn status(&self) -> WorkerStatus {
        self.status
    }

    pub fn current_task(&self) -> Option<TaskId> {
        self.current_task
    }

    /// When the current task was assigned.
    pub fn busy_since(&self) -> Option<Instant> {
        self.busy_since
    }

    /// When this instance was spawned.
    pub fn spawned_at(&self) -> Instant {
        self.spawned_at
    }

    /// Tasks this instance has finished, successfully or not.
    pub fn task_count(&self) -> u64 {
        self.task_count
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn restart_count(&self) -> u32 {
        self.restart_count
    }

    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }

    pub fn unit(&self) -> &dyn ExecutionUnit {
        self.unit.as_ref()
    }

    pub(crate) fn mark_ready(&mut self) {
        self.status = WorkerStatus::Ready;
        self.last_activity = Instant::now();
    }

    pub(crate) fn assign(&mut self, task_id: TaskId) {
        let now = Instant::now();
        self.status = WorkerStatus::Busy;
        self.current_task = Some(task_id);
        self.busy_since = Some(now);
        self.last_activity = now;
    }

    /// Release the current task and return to `Idle`.
    pub(crate) fn finish_task(&mut self) -> Option<TaskId> {
        self.status = WorkerStatus::Idle;
        self.busy_since = None;
        self.task_count += 1;
        self.last_activity = Instant::now();
        self.current_task.take()
    }

    /// Enter `Error`, handing back any task the worker was running.
    pub(crate) fn mark_error(&mut self) -> Option<TaskId> {
        self.status = WorkerStatus::Error;
        self.busy_since = None;
        self.current_task.take()
    }

    /// Terminate the execution unit, handing back any task it was running.
    pub(crate) fn terminate(&mut self) -> Option<TaskId> {
        self.status = WorkerStatus::Terminating;
        self.busy_since = None;
        self.unit.terminate();
        self.current_task.take()
    }

    pub(crate) fn record_stats(&mut self, stats: WorkerStats) {
        self.resource_usage = stats.resource_usage;
        self.last_stats = Some(stats);
    }

    pub(crate) fn record_resource_usage(&mut self, usage: ResourceUsage) {
        self.resource_usage = usage;
    }

    pub(crate) fn send(&self, command: foreman_api::WorkerCommand) -> Result<(), crate::error::WorkerError> {
        self.unit.send(command)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            instance: self.instance,
            status: self.status,
            current_task: self.current_task,
            task_count: self.task_count,
            restart_count: self.restart_count,
            since_last_activity: self.last_activity.elapsed(),
            resource_usage: self.resource_usage,
            reported_stats: self.last_stats.clone(),
            alive: self.unit.is_alive(),
        }
    }
}

/// Read-only copy of a worker's state for status reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub instance: u64,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub task_count: u64,
    pub restart_count: u32,
    pub since_last_activity: Duration,
    pub resource_usage: ResourceUsage,
    pub reported_stats: Option<WorkerStats>,
    pub alive: bool,
}


#[cfg(test)]
mod tests {
    use super::testing::handle;
    use super::*;

    #[test]
    fn test_handle_lifecycle() {
        let (mut worker, unit) = handle(1);
        assert_eq!(worker.status(), WorkerStatus::Initializing);
        assert!(!worker.is_available());

        worker.mark_ready();
        assert!(worker.is_available());

        let task_id = TaskId::new();
        worker.assign(task_id);
        assert_eq!(worker.status(), WorkerStatus::Busy);
        assert!(worker.busy_since().is_some());

        assert_eq!(worker.finish_task(), Some(task_id));
        assert_eq!(worker.status(), WorkerStatus::Idle);
        assert_eq!(worker.task_count(), 1);

        worker.assign(TaskId::new());
        assert!(worker.terminate().is_some());
        assert_eq!(worker.status(), WorkerStatus::Terminating);
        assert!(!unit.is_alive());
    }

    #[test]
    fn test_error_releases_task() {
        let (mut worker, _) = handle(2);
        worker.mark_ready();
        let task_id = TaskId::new();
        worker.assign(task_id);

        assert_eq!(worker.mark_error(), Some(task_id));
        assert_eq!(worker.status(), WorkerStatus::Error);
        assert!(worker.current_task().is_none());
        assert!(!worker.is_available());
    }
}
