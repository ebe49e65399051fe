//! # Health Monitoring
//!
//! Classifies workers on every health tick. The monitor itself never touches
//! execution units; the coordinator acts on the returned [`HealthReport`].
//!
//! ## Rules
//! - A busy worker whose task has run longer than `worker_timeout` is stuck
//! - So is a worker still initializing `worker_timeout` after it was spawned
//! - An available worker idle longer than `idle_timeout` is evicted, unless
//!   worker reuse is enabled
//! - Every other live worker is probed for stats and health

use std::time::{Duration, Instant};

use foreman_api::WorkerId;

use crate::config::PoolConfig;
use crate::worker::{WorkerHandle, WorkerStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitor {
    pub worker_timeout: Duration,
    pub idle_timeout: Duration,
    pub reuse_workers: bool,
}

/// What the coordinator should do after a health tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HealthReport {
    /// Busy or initializing past the worker timeout; restart.
    pub stuck: Vec<WorkerId>,
    /// Idle past the idle timeout; terminate and remove.
    pub evict: Vec<WorkerId>,
    /// Ask for a stats and health snapshot.
    pub probe: Vec<WorkerId>,
}

impl HealthReport {
    pub fn is_empty(&self) -> bool {
        self.stuck.is_empty() && self.evict.is_empty() && self.probe.is_empty()
    }
}

impl HealthMonitor {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            worker_timeout: config.worker_timeout,
            idle_timeout: config.idle_timeout,
            reuse_workers: config.reuse_workers,
        }
    }

    pub fn inspect<'a>(&self, workers: impl IntoIterator<Item = &'a WorkerHandle>, now: Instant) -> HealthReport {
        let mut report = HealthReport::default();

        for worker in workers {
            match worker.status() {
                WorkerStatus::Busy => {
                    let running_for = worker
                        .busy_since()
                        .map(|since| now.saturating_duration_since(since))
                        .unwrap_or_default();
                    if running_for > self.worker_timeout {
                        report.stuck.push(worker.id());
                    } else {
                        report.probe.push(worker.id());
                    }
                }
                WorkerStatus::Ready | WorkerStatus::Idle => {
                    let idle_for = now.saturating_duration_since(worker.last_activity());
                    if !self.reuse_workers && idle_for > self.idle_timeout {
                        report.evict.push(worker.id());
                    } else {
                        report.probe.push(worker.id());
                    }
                }
                WorkerStatus::Initializing => {
                    if now.saturating_duration_since(worker.spawned_at()) > self.worker_timeout {
                        report.stuck.push(worker.id());
                    }
                }
                WorkerStatus::Error | WorkerStatus::Terminating => {}
            }
        }

        report
    }
}
