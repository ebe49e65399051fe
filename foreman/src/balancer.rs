use rand::seq::SliceRandom;

use foreman_api::WorkerId;

use crate::config::LoadBalancingStrategy;

/// An available worker and the number of tasks it has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub worker_id: WorkerId,
    pub task_count: u64,
}

/// Pick the worker that receives the next task.
///
/// Round-robin and least-busy both pick the candidate with the fewest
/// finished tasks, which rotates load across the pool. Ties go to the
/// first candidate in the slice, so callers should pass candidates in a
/// stable order.
pub fn select_worker(strategy: LoadBalancingStrategy, candidates: &[Candidate]) -> Option<WorkerId> {
    match strategy {
        LoadBalancingStrategy::RoundRobin | LoadBalancingStrategy::LeastBusy => candidates
            .iter()
            .min_by_key(|c| c.task_count)
            .map(|c| c.worker_id),
        LoadBalancingStrategy::Random => candidates
            .choose(&mut rand::thread_rng())
            .map(|c| c.worker_id),
    }
}
