use std::fmt;

use foreman_api::{WorkerCommand, WorkerId, WorkerMessage};

use crate::error::WorkerError;

/// Channel on which execution units report back to the coordinator.
pub type EventSender = flume::Sender<WorkerMessage>;

/// Uniform interface over however a worker actually runs.
///
/// The coordinator only ever talks to a worker through this trait, and the
/// worker only ever talks back through its [`EventSender`]. Neither side holds
/// a reference to the other.
pub trait ExecutionUnit: Send + fmt::Debug {
    /// Queue a command for the worker. Never waits for the worker.
    fn send(&self, command: WorkerCommand) -> Result<(), WorkerError>;

    /// Stop the worker. Whatever it is doing is abandoned and it emits no
    /// further events the coordinator will act on.
    fn terminate(&mut self);

    /// Whether the underlying task or thread is still running.
    fn is_alive(&self) -> bool;
}

/// Creates execution units for the coordinator.
pub trait UnitFactory: Send + Sync + fmt::Debug {
    /// Start a new unit for `worker_id`.
    ///
    /// Every event the unit emits must be tagged with `worker_id` and
    /// `instance`. The unit must not report ready until it has received
    /// `WorkerCommand::Initialize`.
    fn spawn(
        &self,
        worker_id: WorkerId,
        instance: u64,
        events: EventSender,
    ) -> Result<Box<dyn ExecutionUnit>, WorkerError>;
}
