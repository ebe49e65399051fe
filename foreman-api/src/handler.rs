use async_trait::async_trait;
use serde_json::Value;

use crate::protocol::{ResourceUsage, WorkerId, WorkerSettings};
use crate::task::TaskRequest;

/// Executes task payloads on behalf of a worker.
///
/// One handler value is shared by every worker of a pool, so implementations
/// must be `Send + Sync`. A returned `Err` becomes a `task-failed` event for
/// that task only. A panic is treated as a fault of the whole worker: the task
/// fails and the worker is restarted.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Called once per worker instance before it reports ready.
    ///
    /// An error here terminates the instance, which the coordinator sees as an
    /// unexpected exit.
    async fn initialize(&self, _worker_id: WorkerId, _settings: &WorkerSettings) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run a single task.
    async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value>;

    /// Resource usage reported in stats and health answers.
    fn resource_usage(&self) -> ResourceUsage {
        ResourceUsage::default()
    }
}
