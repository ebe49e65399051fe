use std::time::Duration;

use serde_json::Value;

use foreman_api::WorkerSettings;

use crate::error::PoolError;

pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 10_000;

// --- Configuration Enums ---

/// Policy selecting which available worker receives the next task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBalancingStrategy {
    /// Rotate load by picking the worker that has finished the fewest tasks.
    RoundRobin,
    /// Pick the worker that has finished the fewest tasks.
    LeastBusy,
    /// Uniform choice among available workers.
    Random,
}

/// Defines the behavior of `submit` once the task queue holds `task_queue_capacity` tasks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackpressureStrategy {
    /// The submission fails immediately with `PoolError::QueueFull`.
    Reject,
    /// The submission waits, in order, until the queue has room.
    Block,
}

// --- Pool Configuration ---

/// Configuration for a `TaskPool`. Immutable once the pool is started.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Workers kept alive when the pool is otherwise idle.
    pub min_workers: usize,

    /// Upper bound on live workers.
    pub max_workers: usize,

    /// A task running longer than this marks its worker as stuck.
    pub worker_timeout: Duration,

    /// An idle worker older than this is evicted unless `reuse_workers` is set.
    pub idle_timeout: Duration,

    /// Period of the health check.
    pub health_check_interval: Duration,

    /// Period of the scaling evaluation.
    pub scale_interval: Duration,

    /// Period of the safety-net dispatch tick.
    pub dispatch_interval: Duration,

    /// Automatic restarts allowed per worker id.
    pub max_restart_attempts: u32,

    /// Delay before a crashed or exited worker is restarted.
    pub restart_delay: Duration,

    pub load_balancing: LoadBalancingStrategy,

    /// Maximum number of queued (not yet running) tasks.
    pub task_queue_capacity: usize,

    /// What `submit` does when the queue is at capacity.
    pub backpressure: BackpressureStrategy,

    /// Keep idle workers alive past `idle_timeout`.
    pub reuse_workers: bool,

    /// Scale up only when more than this many tasks are queued.
    pub scale_up_queue_depth: usize,

    /// Scale up only when busy/total exceeds this fraction.
    pub scale_up_utilization: f64,

    /// Scale down only when more than this many workers are idle.
    pub scale_down_idle_buffer: usize,

    /// Terminal tasks retained per outcome (completed, failed).
    pub history_limit: usize,

    /// Forwarded to every worker in its `initialize` command.
    pub worker_extra: Value,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 1,
            max_workers: num_cpus::get().saturating_sub(1).max(1),
            worker_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            health_check_interval: Duration::from_secs(10),
            scale_interval: Duration::from_secs(10),
            dispatch_interval: Duration::from_millis(100),
            max_restart_attempts: 3,
            restart_delay: Duration::from_secs(5),
            load_balancing: LoadBalancingStrategy::LeastBusy,
            task_queue_capacity: DEFAULT_TASK_QUEUE_CAPACITY,
            backpressure: BackpressureStrategy::Reject,
            reuse_workers: true,
            scale_up_queue_depth: 10,
            scale_up_utilization: 0.8,
            scale_down_idle_buffer: 1,
            history_limit: 1000,
            worker_extra: Value::Null,
        }
    }
}

impl PoolConfig {
    /// Check the configuration for values the coordinator cannot work with.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_workers == 0 {
            return Err(PoolError::InvalidConfig("max_workers must be at least 1".to_string()));
        }
        if self.min_workers > self.max_workers {
            return Err(PoolError::InvalidConfig(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        if self.task_queue_capacity == 0 {
            return Err(PoolError::InvalidConfig("task_queue_capacity must be at least 1".to_string()));
        }

        let intervals = [
            ("worker_timeout", self.worker_timeout),
            ("idle_timeout", self.idle_timeout),
            ("health_check_interval", self.health_check_interval),
            ("scale_interval", self.scale_interval),
            ("dispatch_interval", self.dispatch_interval),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(PoolError::InvalidConfig(format!("{} must be greater than zero", name)));
            }
        }

        if !(self.scale_up_utilization > 0.0 && self.scale_up_utilization <= 1.0) {
            return Err(PoolError::InvalidConfig(format!(
                "scale_up_utilization must be in (0, 1], got {}",
                self.scale_up_utilization
            )));
        }

        Ok(())
    }

    /// Settings sent to each worker when it is initialized.
    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            worker_timeout: self.worker_timeout,
            extra: self.worker_extra.clone(),
        }
    }
}
