//! # Metrics
//!
//! Aggregate counters owned by the coordinator and the derived figures
//! exposed in status snapshots and completion reports.

use std::time::{Duration, Instant};

use serde::Serialize;

/// Point-in-time view of pool throughput and load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetrics {
    pub total_submitted: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub running_count: usize,
    pub queue_length: usize,
    pub total_workers: usize,
    pub busy_workers: usize,
    /// Completed tasks per second since the pool started.
    pub throughput: f64,
    /// busy / total * 100, zero when the pool has no workers.
    pub utilization_pct: f64,
    /// Running mean over completed tasks.
    pub avg_execution_time: Duration,
    pub uptime: Duration,
}

/// Live counters the figures in [`PoolMetrics`] are derived from.
#[derive(Debug)]
pub struct MetricsCollector {
    started_at: Instant,
    total_submitted: u64,
    completed_count: u64,
    failed_count: u64,
    avg_execution_ms: f64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_submitted: 0,
            completed_count: 0,
            failed_count: 0,
            avg_execution_ms: 0.0,
        }
    }

    pub fn record_submitted(&mut self, count: usize) {
        self.total_submitted += count as u64;
    }

    /// Count a completion and fold its duration into the running mean
    /// (`avg += (x - avg) / n`).
    pub fn record_completion(&mut self, execution_time: Duration) {
        self.completed_count += 1;
        let sample = execution_time.as_secs_f64() * 1000.0;
        self.avg_execution_ms += (sample - self.avg_execution_ms) / self.completed_count as f64;
    }

    pub fn record_failure(&mut self) {
        self.failed_count += 1;
    }

    pub fn total_submitted(&self) -> u64 {
        self.total_submitted
    }

    pub fn completed_count(&self) -> u64 {
        self.completed_count
    }

    pub fn failed_count(&self) -> u64 {
        self.failed_count
    }

    pub fn avg_execution_time(&self) -> Duration {
        Duration::from_secs_f64(self.avg_execution_ms.max(0.0) / 1000.0)
    }

    /// Derive a snapshot from the counters and the live pool figures.
    pub fn snapshot(
        &self,
        queue_length: usize,
        running_count: usize,
        total_workers: usize,
        busy_workers: usize,
    ) -> PoolMetrics {
        let uptime = self.started_at.elapsed();
        PoolMetrics {
            total_submitted: self.total_submitted,
            completed_count: self.completed_count,
            failed_count: self.failed_count,
            running_count,
            queue_length,
            total_workers,
            busy_workers,
            throughput: throughput(self.completed_count, uptime),
            utilization_pct: utilization_pct(busy_workers, total_workers),
            avg_execution_time: self.avg_execution_time(),
            uptime,
        }
    }
}

fn throughput(completed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        0.0
    } else {
        completed as f64 / secs
    }
}

fn utilization_pct(busy: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        busy as f64 / total as f64 * 100.0
    }
}
