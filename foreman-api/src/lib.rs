//! # Foreman API
//!
//! Runtime-agnostic vocabulary shared by the Foreman coordinator and the
//! workers it drives. Nothing in this crate schedules or executes anything;
//! it only describes what a task is, what coordinator and worker say to each
//! other, and what a payload executor has to implement.
//!
//! ## Core Components
//!
//! - **Tasks**: [`TaskSpec`] is what callers submit, [`Task`] is the
//!   coordinator's record of it, [`TaskRequest`] is what a worker receives.
//! - **Worker protocol**: [`WorkerCommand`] flows coordinator -> worker,
//!   [`WorkerEvent`] flows back, wrapped in a [`WorkerMessage`] that names the
//!   sending worker instance.
//! - **Handlers**: [`TaskHandler`] is the seam where the payload collaborator
//!   plugs in.
//! - **Errors**: [`TaskError`] describes why a single task failed.
//!
//! ## Usage Example
//!
//! ```rust
//! use async_trait::async_trait;
//! use foreman_api::{TaskHandler, TaskRequest};
//! use serde_json::{json, Value};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl TaskHandler for Echo {
//!     async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value> {
//!         Ok(json!({ "kind": task.kind, "data": task.payload }))
//!     }
//! }
//! ```

pub mod errors;
pub mod handler;
pub mod protocol;
pub mod task;

pub use errors::TaskError;
pub use handler::TaskHandler;
pub use protocol::{
    ResourceUsage, WorkerCommand, WorkerEvent, WorkerHealth, WorkerId, WorkerMessage,
    WorkerSettings, WorkerStats,
};
pub use task::{Task, TaskId, TaskRequest, TaskSpec, TaskStatus};
