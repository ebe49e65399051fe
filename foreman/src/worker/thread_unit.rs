//! # Dedicated Thread Units
//!
//! Execution unit that runs a worker on its own OS thread with a private
//! current-thread tokio runtime. Useful when handlers do CPU-heavy or
//! blocking work that should not share the coordinator's runtime.
//!
//! ## Design Principles
//! - Isolation: one thread per worker instance, named after the worker
//! - Panic recovery: a panic anywhere on the thread is reported as a fault
//! - Controlled shutdown: terminate signals the thread and detaches it;
//!   a handler blocked in synchronous code finishes before the thread exits

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::oneshot;
use tracing::debug;

use foreman_api::{TaskHandler, WorkerCommand, WorkerEvent, WorkerId, WorkerMessage};

use super::runner::{panic_message, run_worker};
use super::unit::{EventSender, ExecutionUnit, UnitFactory};
use crate::error::WorkerError;

/// Worker running on a dedicated OS thread.
pub struct ThreadUnit {
    worker_id: WorkerId,
    commands: Option<flume::Sender<WorkerCommand>>,
    stop_tx: Option<oneshot::Sender<()>>,
    alive: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for ThreadUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadUnit")
            .field("worker_id", &self.worker_id)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .field("has_thread", &self.thread_handle.is_some())
            .finish()
    }
}

impl ExecutionUnit for ThreadUnit {
    fn send(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        match &self.commands {
            Some(commands) => commands
                .send(command)
                .map_err(|_| WorkerError::ChannelClosed(self.worker_id)),
            None => Err(WorkerError::ChannelClosed(self.worker_id)),
        }
    }

    fn terminate(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        self.commands = None;
        // Detach; the thread exits on its own once the stop signal is seen.
        self.thread_handle = None;
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Spawns one named OS thread per worker.
///
/// Terminating a unit cannot interrupt a handler blocked in synchronous
/// code. The detached thread runs until the handler returns and sends no
/// further events, so it keeps holding its OS thread after the coordinator
/// has moved on.
pub struct ThreadUnitFactory {
    handler: Arc<dyn TaskHandler>,
    thread_name_prefix: String,
}

impl fmt::Debug for ThreadUnitFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadUnitFactory")
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish()
    }
}

impl ThreadUnitFactory {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            handler,
            thread_name_prefix: "foreman-worker".to_string(),
        }
    }

    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

impl UnitFactory for ThreadUnitFactory {
    fn spawn(
        &self,
        worker_id: WorkerId,
        instance: u64,
        events: EventSender,
    ) -> Result<Box<dyn ExecutionUnit>, WorkerError> {
        let (command_tx, command_rx) = flume::unbounded();
        let (stop_tx, stop_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));

        let handler = Arc::clone(&self.handler);
        let thread_alive = Arc::clone(&alive);
        let dispatch = crate::logging::current_subscriber();

        let thread_handle = std::thread::Builder::new()
            .name(format!("{}-{}", self.thread_name_prefix, worker_id))
            .spawn(move || {
                let _log_guard = tracing::dispatcher::set_default(&dispatch);
                worker_thread_main(handler, worker_id, instance, command_rx, events, stop_rx);
                thread_alive.store(false, Ordering::SeqCst);
            })
            .map_err(|e| WorkerError::SpawnFailed {
                worker: worker_id,
                reason: e.to_string(),
            })?;

        Ok(Box::new(ThreadUnit {
            worker_id,
            commands: Some(command_tx),
            stop_tx: Some(stop_tx),
            alive,
            thread_handle: Some(thread_handle),
        }))
    }
}

fn worker_thread_main(
    handler: Arc<dyn TaskHandler>,
    worker_id: WorkerId,
    instance: u64,
    commands: flume::Receiver<WorkerCommand>,
    events: EventSender,
    stop_rx: oneshot::Receiver<()>,
) {
    let report = events.clone();
    let result = std::panic::catch_unwind(AssertUnwindSafe(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        runtime.block_on(async move {
            tokio::select! {
                _ = run_worker(handler, worker_id, instance, commands, events) => {}
                // Fires on terminate, or when the unit is dropped.
                _ = stop_rx => {}
            }
        });

        Ok::<(), std::io::Error>(())
    }));

    let event = match result {
        Ok(Ok(())) => {
            debug!(worker_id = %worker_id, instance, "worker thread terminated normally");
            return;
        }
        Ok(Err(e)) => WorkerEvent::Exited {
            reason: format!("failed to build worker runtime: {}", e),
        },
        Err(panic) => WorkerEvent::Fault {
            error: panic_message(panic.as_ref()),
        },
    };

    let _ = report.send(WorkerMessage::new(worker_id, instance, event));
}
