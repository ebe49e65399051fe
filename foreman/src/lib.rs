//! # Foreman
//!
//! In-process worker pool: a single coordinator task distributes submitted
//! tasks across a pool of workers, scales the pool with load, restarts stuck
//! or crashed workers and keeps execution metrics.
//!
//! ## Core Components
//!
//! - [`TaskPool`]: caller handle for submitting tasks, waiting, and stopping
//! - `coordinator`: the event loop that owns every piece of pool state
//! - [`worker`]: worker handles, execution units and the worker-side loop
//! - [`health`] and [`scaler`]: the periodic health and scaling decisions
//! - [`metrics`]: throughput, utilization and timing figures
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use foreman::{PoolConfig, TaskPool};
//! use foreman_api::{TaskHandler, TaskRequest, TaskSpec};
//! use serde_json::{json, Value};
//!
//! struct Render;
//!
//! #[async_trait]
//! impl TaskHandler for Render {
//!     async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value> {
//!         Ok(json!({ "rendered": task.payload }))
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pool = TaskPool::builder(PoolConfig::default())
//!     .with_handler(Arc::new(Render))
//!     .start()?;
//!
//! pool.submit(TaskSpec::new("page", json!({ "url": "/" }))).await?;
//! let report = pool.wait_for_completion(Duration::from_secs(5)).await?;
//! assert_eq!(report.completed.len(), 1);
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod balancer;
pub mod config;
mod coordinator;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod pool;
pub mod queue;
pub mod scaler;
pub mod worker;

pub use config::{BackpressureStrategy, LoadBalancingStrategy, PoolConfig};
pub use coordinator::CompletionCallback;
pub use error::{PoolError, WorkerError};
pub use metrics::PoolMetrics;
pub use pool::{CompletionReport, PoolBuilder, PoolStatus, QueueSummary, TaskPool};
pub use worker::{
    ExecutionUnit, ThreadUnitFactory, TokioUnitFactory, UnitFactory, WorkerSnapshot, WorkerStatus,
};

pub use foreman_api::{Task, TaskError, TaskHandler, TaskId, TaskSpec, TaskStatus};
