use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use foreman_api::{TaskHandler, WorkerCommand, WorkerEvent, WorkerId, WorkerMessage};

use super::runner::{panic_message, run_worker};
use super::unit::{EventSender, ExecutionUnit, UnitFactory};
use crate::error::WorkerError;

/// Execution unit backed by a tokio task.
///
/// Terminating aborts the task, which cancels an in-flight handler at its
/// next await point.
pub struct TokioUnit {
    worker_id: WorkerId,
    commands: flume::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl fmt::Debug for TokioUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioUnit")
            .field("worker_id", &self.worker_id)
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

impl ExecutionUnit for TokioUnit {
    fn send(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        self.commands
            .send(command)
            .map_err(|_| WorkerError::ChannelClosed(self.worker_id))
    }

    fn terminate(&mut self) {
        self.task.abort();
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Spawns one tokio task per worker on the given runtime.
pub struct TokioUnitFactory {
    handler: Arc<dyn TaskHandler>,
    runtime_handle: Option<Handle>,
}

impl fmt::Debug for TokioUnitFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioUnitFactory")
            .field("pinned_runtime", &self.runtime_handle.is_some())
            .finish()
    }
}

impl TokioUnitFactory {
    /// Spawn workers on whichever runtime the coordinator runs on.
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            handler,
            runtime_handle: None,
        }
    }

    /// Spawn workers on a specific runtime.
    pub fn with_runtime(handler: Arc<dyn TaskHandler>, runtime_handle: Handle) -> Self {
        Self {
            handler,
            runtime_handle: Some(runtime_handle),
        }
    }
}

impl UnitFactory for TokioUnitFactory {
    fn spawn(
        &self,
        worker_id: WorkerId,
        instance: u64,
        events: EventSender,
    ) -> Result<Box<dyn ExecutionUnit>, WorkerError> {
        let runtime_handle = match &self.runtime_handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|e| WorkerError::SpawnFailed {
                worker: worker_id,
                reason: e.to_string(),
            })?,
        };

        let (command_tx, command_rx) = flume::unbounded();
        let handler = Arc::clone(&self.handler);
        let span = crate::worker_span!(worker_id, instance);

        let task = runtime_handle.spawn(
            async move {
                let fault_events = events.clone();
                let outcome = AssertUnwindSafe(run_worker(handler, worker_id, instance, command_rx, events))
                    .catch_unwind()
                    .await;

                if let Err(panic) = outcome {
                    let _ = fault_events.send(WorkerMessage::new(
                        worker_id,
                        instance,
                        WorkerEvent::Fault {
                            error: panic_message(panic.as_ref()),
                        },
                    ));
                }
            }
            .instrument(span),
        );

        Ok(Box::new(TokioUnit {
            worker_id,
            commands: command_tx,
            task,
        }))
    }
}
