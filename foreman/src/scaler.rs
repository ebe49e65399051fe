//! # Adaptive Scaling
//!
//! Pure decision logic for growing and shrinking the pool. The coordinator
//! feeds a [`ScalingInput`] on every scaling tick and applies the returned
//! [`ScalingDecision`]. Decisions are always one worker at a time.

use std::fmt;

use crate::config::PoolConfig;

/// Load figures the policy decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingInput {
    pub queue_length: usize,
    /// Registered workers, whatever their status.
    pub total_workers: usize,
    pub busy_workers: usize,
    /// Workers in `Ready` or `Idle`.
    pub idle_workers: usize,
    /// Slots waiting for a delayed restart.
    pub pending_restarts: usize,
}

/// Why the pool grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleUpReason {
    /// Fewer workers than `min_workers`.
    BelowMinimum,
    /// Queue deeper than the threshold while the pool is saturated.
    QueuePressure,
}

impl fmt::Display for ScaleUpReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleUpReason::BelowMinimum => write!(f, "below minimum"),
            ScaleUpReason::QueuePressure => write!(f, "queue pressure"),
        }
    }
}

/// Outcome of one scaling evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingDecision {
    Hold,
    ScaleUp(ScaleUpReason),
    ScaleDown,
}

/// Thresholds for [`ScalingPolicy::evaluate`], taken from the pool config.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingPolicy {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_depth: usize,
    pub utilization: f64,
    pub idle_buffer: usize,
}

impl ScalingPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            queue_depth: config.scale_up_queue_depth,
            utilization: config.scale_up_utilization,
            idle_buffer: config.scale_down_idle_buffer,
        }
    }

    pub fn evaluate(&self, input: &ScalingInput) -> ScalingDecision {
        let total = input.total_workers;
        let below_max = total < self.max_workers;

        // Pending restarts will bring their slot back on their own.
        if below_max && total + input.pending_restarts < self.min_workers {
            return ScalingDecision::ScaleUp(ScaleUpReason::BelowMinimum);
        }

        // An empty pool never drains its queue.
        if below_max && total == 0 && input.queue_length > 0 {
            return ScalingDecision::ScaleUp(ScaleUpReason::QueuePressure);
        }

        if below_max && input.queue_length > self.queue_depth && self.saturated(input) {
            return ScalingDecision::ScaleUp(ScaleUpReason::QueuePressure);
        }

        if input.queue_length == 0
            && input.busy_workers == 0
            && total > self.min_workers
            && input.idle_workers > self.idle_buffer
        {
            return ScalingDecision::ScaleDown;
        }

        ScalingDecision::Hold
    }

    fn saturated(&self, input: &ScalingInput) -> bool {
        input.total_workers > 0 && input.busy_workers as f64 / input.total_workers as f64 > self.utilization
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(min: usize, max: usize) -> ScalingPolicy {
        ScalingPolicy {
            min_workers: min,
            max_workers: max,
            queue_depth: 10,
            utilization: 0.8,
            idle_buffer: 1,
        }
    }

    fn input(queue: usize, total: usize, busy: usize, idle: usize) -> ScalingInput {
        ScalingInput {
            queue_length: queue,
            total_workers: total,
            busy_workers: busy,
            idle_workers: idle,
            pending_restarts: 0,
        }
    }

    #[test]
    fn test_scale_up_under_queue_pressure() {
        let decision = policy(1, 4).evaluate(&input(11, 2, 2, 0));
        assert_eq!(decision, ScalingDecision::ScaleUp(ScaleUpReason::QueuePressure));
    }

    #[test]
    fn test_no_scale_up_at_threshold() {
        // Queue must exceed the depth, not equal it.
        assert_eq!(policy(1, 4).evaluate(&input(10, 2, 2, 0)), ScalingDecision::Hold);
        // Utilization must exceed the fraction.
        assert_eq!(policy(1, 4).evaluate(&input(20, 5, 4, 1)), ScalingDecision::Hold);
    }

    #[test]
    fn test_no_scale_up_at_max() {
        assert_eq!(policy(1, 2).evaluate(&input(50, 2, 2, 0)), ScalingDecision::Hold);
    }

    #[test]
    fn test_scale_down_with_idle_surplus() {
        assert_eq!(policy(1, 4).evaluate(&input(0, 3, 0, 3)), ScalingDecision::ScaleDown);
        // Also when the pool sits at its maximum.
        assert_eq!(policy(1, 3).evaluate(&input(0, 3, 0, 3)), ScalingDecision::ScaleDown);
    }

    #[test]
    fn test_no_scale_down_at_minimum_or_with_work() {
        assert_eq!(policy(2, 4).evaluate(&input(0, 2, 0, 2)), ScalingDecision::Hold);
        assert_eq!(policy(1, 4).evaluate(&input(1, 3, 0, 3)), ScalingDecision::Hold);
        assert_eq!(policy(1, 4).evaluate(&input(0, 3, 1, 2)), ScalingDecision::Hold);
    }

    #[test]
    fn test_no_scale_down_within_idle_buffer() {
        let policy = ScalingPolicy { idle_buffer: 3, ..policy(1, 4) };
        assert_eq!(policy.evaluate(&input(0, 3, 0, 3)), ScalingDecision::Hold);
    }

    #[test]
    fn test_floor_is_restored() {
        assert_eq!(
            policy(2, 4).evaluate(&input(0, 1, 0, 1)),
            ScalingDecision::ScaleUp(ScaleUpReason::BelowMinimum)
        );
    }

    #[test]
    fn test_pending_restart_counts_toward_floor() {
        let pending = ScalingInput { pending_restarts: 1, ..input(0, 1, 0, 1) };
        assert_eq!(policy(2, 4).evaluate(&pending), ScalingDecision::Hold);
    }

    #[test]
    fn test_empty_pool_with_work_scales_up() {
        assert_eq!(
            policy(0, 4).evaluate(&input(1, 0, 0, 0)),
            ScalingDecision::ScaleUp(ScaleUpReason::QueuePressure)
        );
        assert_eq!(policy(0, 4).evaluate(&input(0, 0, 0, 0)), ScalingDecision::Hold);
    }
}
