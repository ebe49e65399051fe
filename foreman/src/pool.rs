use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use foreman_api::{Task, TaskHandler, TaskId, TaskSpec};

use crate::config::PoolConfig;
use crate::coordinator::{Command, CompletionCallback, Coordinator};
use crate::error::PoolError;
use crate::metrics::PoolMetrics;
use crate::worker::{TokioUnitFactory, UnitFactory, WorkerSnapshot};

/// Queue figures in a [`PoolStatus`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub length: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    /// Tasks in submissions parked by [`BackpressureStrategy::Block`](crate::BackpressureStrategy::Block).
    pub blocked: usize,
}

/// Point-in-time view of the pool. Taking one has no side effects.
///
/// Only a running pool answers; use [`TaskPool::is_running`] to check liveness.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub workers: Vec<WorkerSnapshot>,
    pub queue: QueueSummary,
    pub metrics: PoolMetrics,
}

/// Returned by [`TaskPool::wait_for_completion`] once nothing is queued or
/// running. Histories are bounded by `history_limit`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub completed: Vec<Task>,
    pub failed: Vec<Task>,
    pub metrics: PoolMetrics,
}

/// Handle to a running pool.
///
/// Cheap to clone; every clone talks to the same coordinator. The pool stops
/// when [`stop`](TaskPool::stop) is called or the last handle is dropped.
#[derive(Clone)]
pub struct TaskPool {
    commands: mpsc::UnboundedSender<Command>,
}

impl fmt::Debug for TaskPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskPool")
            .field("running", &self.is_running())
            .finish()
    }
}

impl TaskPool {
    pub fn builder(config: PoolConfig) -> PoolBuilder {
        PoolBuilder::new(config)
    }

    /// Start a pool whose workers come from `factory`.
    pub fn start(config: PoolConfig, factory: Arc<dyn UnitFactory>) -> Result<Self, PoolError> {
        PoolBuilder::new(config).with_unit_factory(factory).start()
    }

    /// Queue one task. Dispatch starts as soon as a worker is free.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, PoolError> {
        let ids = self.add_tasks(vec![spec]).await?;
        ids.into_iter().next().ok_or(PoolError::Stopped)
    }

    /// Queue several tasks in order. Either all are accepted or none is.
    pub async fn add_tasks(&self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>, PoolError> {
        self.request(|reply| Command::Submit { specs, reply }).await?
    }

    /// Wait until nothing is queued or running.
    ///
    /// Fails with [`PoolError::CompletionTimeout`] after `timeout`; the pool
    /// keeps running either way.
    pub async fn wait_for_completion(&self, timeout: Duration) -> Result<CompletionReport, PoolError> {
        match tokio::time::timeout(timeout, self.request(|reply| Command::WaitIdle { reply })).await {
            Ok(report) => report,
            Err(_) => Err(PoolError::CompletionTimeout(timeout)),
        }
    }

    pub async fn status(&self) -> Result<PoolStatus, PoolError> {
        self.request(|reply| Command::Status { reply }).await
    }

    /// Terminate every worker and clear pool state.
    ///
    /// Running tasks fail with `PoolStopped`; queued tasks are discarded.
    /// Stopping an already stopped pool is a no-op.
    pub async fn stop(&self) -> Result<(), PoolError> {
        match self.request(|reply| Command::Stop { reply }).await {
            Ok(()) | Err(PoolError::NotRunning) | Err(PoolError::Stopped) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, PoolError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| PoolError::NotRunning)?;
        response.await.map_err(|_| PoolError::Stopped)
    }
}

/// Configures and starts a [`TaskPool`].
pub struct PoolBuilder {
    config: PoolConfig,
    factory: Option<Arc<dyn UnitFactory>>,
    on_complete: Option<CompletionCallback>,
    runtime: Option<Handle>,
}

impl fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("config", &self.config)
            .field("factory", &self.factory)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl PoolBuilder {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            factory: None,
            on_complete: None,
            runtime: None,
        }
    }

    /// Run `handler` on one tokio task per worker.
    pub fn with_handler(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.factory = Some(Arc::new(TokioUnitFactory::new(handler)));
        self
    }

    pub fn with_unit_factory(mut self, factory: Arc<dyn UnitFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Called from the coordinator for every task that completes or fails.
    /// Keep it short; dispatch waits while it runs.
    pub fn on_task_complete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(callback));
        self
    }

    /// Run the coordinator on `runtime` instead of the current one.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn start(self) -> Result<TaskPool, PoolError> {
        self.config.validate()?;

        let factory = self.factory.ok_or_else(|| {
            PoolError::InvalidConfig("a task handler or unit factory is required".to_string())
        })?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| PoolError::RuntimeUnavailable(e.to_string()))?,
        };

        let (commands, receiver) = mpsc::unbounded_channel();
        let coordinator = Coordinator::new(self.config, factory, self.on_complete);
        runtime.spawn(coordinator.run(receiver).instrument(crate::pool_span!("coordinator")));

        Ok(TaskPool { commands })
    }
}
