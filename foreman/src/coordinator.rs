//! # Coordinator
//!
//! The single owner of pool state. One tokio task runs [`Coordinator::run`],
//! which multiplexes caller commands, worker events and three timers
//! (dispatch, health, scaling) through one `select!` loop. Nothing else
//! touches the queue, the worker registry or the task maps, so none of them
//! need locks.
//!
//! ## Core Algorithm
//! 1. Submissions land in the FIFO queue, subject to backpressure
//! 2. Dispatch pairs the queue head with a worker chosen by the balancer
//! 3. Worker events complete or fail the running task and free the worker
//! 4. Faults and exits fail the affected task and schedule a capped restart
//! 5. Health ticks restart stuck workers, evict idle ones and probe the rest
//! 6. Scale ticks grow or shrink the pool by one worker
//!
//! ### Worker generations
//! A restart keeps the worker id but spawns a new instance. Every event
//! carries the instance that sent it; events from an instance that is no
//! longer registered are dropped.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Interval, MissedTickBehavior};
use tracing::{debug, trace, warn};

use foreman_api::{
    Task, TaskError, TaskId, TaskSpec, WorkerCommand, WorkerEvent, WorkerId, WorkerMessage,
};

use crate::balancer::{select_worker, Candidate};
use crate::config::{BackpressureStrategy, PoolConfig};
use crate::error::{PoolError, WorkerError};
use crate::health::HealthMonitor;
use crate::metrics::{MetricsCollector, PoolMetrics};
use crate::pool::{CompletionReport, PoolStatus, QueueSummary};
use crate::queue::{TaskHistory, TaskQueue};
use crate::scaler::{ScalingDecision, ScalingInput, ScalingPolicy};
use crate::worker::{panic_message, EventSender, UnitFactory, WorkerHandle, WorkerStatus};
use crate::{log_error, log_pool, log_task, log_worker};

/// Invoked once for every task that reaches a terminal state.
pub type CompletionCallback = Arc<dyn Fn(&Task) + Send + Sync>;

type SubmitReply = oneshot::Sender<Result<Vec<TaskId>, PoolError>>;

/// Requests from [`TaskPool`](crate::TaskPool) handles.
pub(crate) enum Command {
    Submit { specs: Vec<TaskSpec>, reply: SubmitReply },
    Status { reply: oneshot::Sender<PoolStatus> },
    WaitIdle { reply: oneshot::Sender<CompletionReport> },
    Stop { reply: oneshot::Sender<()> },
}

struct RunningTask {
    task: Task,
    started: Instant,
}

/// A submission parked under [`BackpressureStrategy::Block`].
struct BlockedSubmit {
    specs: Vec<TaskSpec>,
    reply: SubmitReply,
}

#[derive(Debug, Clone, Copy)]
struct PendingRestart {
    worker_id: WorkerId,
    due: Instant,
}

pub(crate) struct Coordinator {
    config: Arc<PoolConfig>,
    factory: Arc<dyn UnitFactory>,
    events_tx: EventSender,
    events_rx: flume::Receiver<WorkerMessage>,

    queue: TaskQueue,
    running: HashMap<TaskId, RunningTask>,
    completed: TaskHistory,
    failed: TaskHistory,
    blocked: VecDeque<BlockedSubmit>,
    idle_waiters: Vec<oneshot::Sender<CompletionReport>>,

    workers: BTreeMap<WorkerId, WorkerHandle>,
    // Survives handle replacement; keyed by slot id.
    restart_counts: HashMap<WorkerId, u32>,
    pending_restarts: Vec<PendingRestart>,
    next_worker_id: u64,
    next_instance: u64,

    metrics: MetricsCollector,
    health: HealthMonitor,
    scaling: ScalingPolicy,
    on_complete: Option<CompletionCallback>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("workers", &self.workers.len())
            .field("queued", &self.queue.len())
            .field("running", &self.running.len())
            .field("pending_restarts", &self.pending_restarts.len())
            .finish()
    }
}

impl Coordinator {
    pub(crate) fn new(
        config: PoolConfig,
        factory: Arc<dyn UnitFactory>,
        on_complete: Option<CompletionCallback>,
    ) -> Self {
        let (events_tx, events_rx) = flume::unbounded();
        Self {
            queue: TaskQueue::new(config.task_queue_capacity),
            completed: TaskHistory::new(config.history_limit),
            failed: TaskHistory::new(config.history_limit),
            health: HealthMonitor::from_config(&config),
            scaling: ScalingPolicy::from_config(&config),
            config: Arc::new(config),
            factory,
            events_tx,
            events_rx,
            running: HashMap::new(),
            blocked: VecDeque::new(),
            idle_waiters: Vec::new(),
            workers: BTreeMap::new(),
            restart_counts: HashMap::new(),
            pending_restarts: Vec::new(),
            next_worker_id: 0,
            next_instance: 0,
            metrics: MetricsCollector::new(),
            on_complete,
        }
    }

    /// Run the coordinator until `Stop` arrives or every pool handle is gone.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        log_pool!(
            "start",
            min_workers = self.config.min_workers,
            max_workers = self.config.max_workers,
            strategy = ?self.config.load_balancing
        );
        for _ in 0..self.config.min_workers {
            self.spawn_worker();
        }

        let events = self.events_rx.clone();
        let mut dispatch_tick = ticker(self.config.dispatch_interval);
        let mut health_tick = ticker(self.config.health_check_interval);
        let mut scale_tick = ticker(self.config.scale_interval);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Stop { reply }) => {
                        self.shutdown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Ok(message) = events.recv_async() => self.handle_worker_message(message),
                _ = dispatch_tick.tick() => {
                    self.process_pending_restarts();
                    self.dispatch();
                }
                _ = health_tick.tick() => self.run_health_check(),
                _ = scale_tick.tick() => self.apply_scaling(),
            }

            self.resolve_idle_waiters();
        }

        log_pool!("stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { specs, reply } => self.handle_submit(specs, reply),
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            // Answered by `resolve_idle_waiters` once the pool drains.
            Command::WaitIdle { reply } => self.idle_waiters.push(reply),
            Command::Stop { reply } => {
                self.shutdown();
                let _ = reply.send(());
            }
        }
    }

    fn handle_submit(&mut self, specs: Vec<TaskSpec>, reply: SubmitReply) {
        let capacity = self.queue.capacity();
        if specs.len() > capacity {
            let _ = reply.send(Err(PoolError::QueueFull { capacity }));
            return;
        }

        // Blocked submitters keep their place in line.
        if self.blocked.is_empty() && self.queue.has_room_for(specs.len()) {
            let ids = self.enqueue(specs);
            let _ = reply.send(Ok(ids));
            self.dispatch();
            return;
        }

        match self.config.backpressure {
            BackpressureStrategy::Reject => {
                debug!(queued = self.queue.len(), capacity, "submission rejected, queue full");
                let _ = reply.send(Err(PoolError::QueueFull { capacity }));
            }
            BackpressureStrategy::Block => {
                debug!(queued = self.queue.len(), tasks = specs.len(), "submission parked until the queue has room");
                self.blocked.push_back(BlockedSubmit { specs, reply });
            }
        }
    }

    fn enqueue(&mut self, specs: Vec<TaskSpec>) -> Vec<TaskId> {
        self.metrics.record_submitted(specs.len());
        specs
            .into_iter()
            .map(|spec| {
                let task = Task::queued(TaskId::new(), spec);
                let id = task.id;
                log_task!(id, "queued", kind = %task.kind);
                self.queue.push_back(task);
                id
            })
            .collect()
    }

    /// Move parked submissions into the queue, oldest first, while they fit.
    fn admit_blocked(&mut self) {
        loop {
            let admit = match self.blocked.front() {
                Some(next) => next.reply.is_closed() || self.queue.has_room_for(next.specs.len()),
                None => break,
            };
            if !admit {
                break;
            }
            let Some(BlockedSubmit { specs, reply }) = self.blocked.pop_front() else {
                break;
            };
            // The submitter gave up waiting.
            if reply.is_closed() {
                continue;
            }
            let ids = self.enqueue(specs);
            let _ = reply.send(Ok(ids));
        }
    }

    fn dispatch(&mut self) {
        loop {
            self.admit_blocked();
            if self.queue.is_empty() {
                break;
            }

            let candidates: Vec<Candidate> = self
                .workers
                .values()
                .filter(|w| w.is_available())
                .map(|w| Candidate {
                    worker_id: w.id(),
                    task_count: w.task_count(),
                })
                .collect();
            let Some(worker_id) = select_worker(self.config.load_balancing, &candidates) else {
                break;
            };
            let Some(task) = self.queue.pop_front() else {
                break;
            };

            self.assign(worker_id, task);
        }
    }

    fn assign(&mut self, worker_id: WorkerId, mut task: Task) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            self.queue.push_front(task);
            return;
        };

        if let Err(e) = worker.send(WorkerCommand::ExecuteTask(task.request())) {
            // Not assigned yet, so the task keeps its place at the head.
            self.queue.push_front(task);
            self.handle_fault(worker_id, e.to_string());
            return;
        }

        worker.assign(task.id);
        task.mark_running(worker_id);
        log_task!(task.id, "running", worker_id = %worker_id);
        self.running.insert(
            task.id,
            RunningTask {
                task,
                started: Instant::now(),
            },
        );
    }

    fn handle_worker_message(&mut self, message: WorkerMessage) {
        let WorkerMessage {
            worker_id,
            instance,
            event,
        } = message;

        let current = self.workers.get(&worker_id).map(WorkerHandle::instance);
        if current != Some(instance) {
            trace!(worker_id = %worker_id, instance, event = event.name(), "dropping event from retired instance");
            return;
        }

        match event {
            WorkerEvent::Ready => {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.mark_ready();
                }
                log_worker!(worker_id, "ready", instance);
                self.dispatch();
            }
            WorkerEvent::TaskCompleted { task_id, result } => {
                if self.release_worker(worker_id, task_id) {
                    self.complete_task(task_id, result);
                }
                self.dispatch();
            }
            WorkerEvent::TaskFailed { task_id, error } => {
                if self.release_worker(worker_id, task_id) {
                    self.fail_task(task_id, TaskError::Handler(error));
                }
                self.dispatch();
            }
            WorkerEvent::Stats(stats) => {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.record_stats(stats);
                }
            }
            WorkerEvent::Health(health) => {
                if let Some(worker) = self.workers.get_mut(&worker_id) {
                    worker.record_resource_usage(health.resource_usage);
                    if !health.healthy && worker.status() != WorkerStatus::Initializing {
                        warn!(worker_id = %worker_id, "worker reports itself unhealthy");
                    }
                }
            }
            WorkerEvent::Fault { error } => self.handle_fault(worker_id, error),
            WorkerEvent::Exited { reason } => self.handle_exit(worker_id, reason),
        }
    }

    /// Free the worker after it reports on `task_id`. Returns false when the
    /// report does not match the task the worker was given.
    fn release_worker(&mut self, worker_id: WorkerId, task_id: TaskId) -> bool {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return false;
        };
        if worker.current_task() != Some(task_id) {
            warn!(
                worker_id = %worker_id,
                task_id = %task_id,
                "worker reported on a task it was not running"
            );
            return false;
        }
        worker.finish_task();
        true
    }

    fn complete_task(&mut self, task_id: TaskId, result: serde_json::Value) {
        let Some(RunningTask { mut task, started }) = self.running.remove(&task_id) else {
            return;
        };
        let execution_time = started.elapsed();
        task.mark_completed(result, execution_time);
        self.metrics.record_completion(execution_time);
        log_task!(task_id, "completed", elapsed_ms = execution_time.as_millis() as u64);
        self.notify(&task);
        self.completed.record(task);
    }

    fn fail_task(&mut self, task_id: TaskId, error: TaskError) {
        let Some(RunningTask { mut task, started }) = self.running.remove(&task_id) else {
            return;
        };
        log_task!(task_id, "failed", error = %error);
        task.mark_failed(error, started.elapsed());
        self.metrics.record_failure();
        self.notify(&task);
        self.failed.record(task);
    }

    fn notify(&self, task: &Task) {
        let Some(callback) = &self.on_complete else {
            return;
        };
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(task))) {
            log_error!(panic_message(panic.as_ref()), task_id = %task.id, "completion callback panicked");
        }
    }

    /// Spawn an execution unit for `worker_id` and send it `initialize`.
    pub(crate) fn create_worker(&mut self, worker_id: WorkerId) -> Result<(), WorkerError> {
        let instance = self.next_instance;
        self.next_instance += 1;

        let unit = self.factory.spawn(worker_id, instance, self.events_tx.clone())?;
        let restart_count = self.restart_counts.get(&worker_id).copied().unwrap_or(0);
        let mut handle = WorkerHandle::new(worker_id, instance, unit, restart_count);

        let init = WorkerCommand::Initialize {
            worker_id,
            settings: self.config.worker_settings(),
        };
        if let Err(e) = handle.send(init) {
            handle.terminate();
            return Err(e);
        }

        self.workers.insert(worker_id, handle);
        log_worker!(worker_id, "spawned", instance, restart_count);
        Ok(())
    }

    /// Add a worker under a fresh id.
    fn spawn_worker(&mut self) {
        let worker_id = WorkerId::new(self.next_worker_id);
        self.next_worker_id += 1;

        if let Err(e) = self.create_worker(worker_id) {
            log_error!(e, worker_id = %worker_id, "pool continues one worker short");
        }
    }

    /// Replace the worker behind `worker_id` with a new instance.
    ///
    /// Any task the old instance was running fails. Each call counts against
    /// `max_restart_attempts`; once the limit is reached the slot is dropped.
    pub(crate) fn restart_worker(&mut self, worker_id: WorkerId, reason: &str) -> Result<(), WorkerError> {
        let attempts = self.restart_counts.get(&worker_id).copied().unwrap_or(0);
        if attempts >= self.config.max_restart_attempts {
            return Err(self.abandon_slot(worker_id));
        }

        if let Some(mut old) = self.workers.remove(&worker_id) {
            if let Some(task_id) = old.terminate() {
                self.fail_task(
                    task_id,
                    TaskError::WorkerTerminated {
                        worker: worker_id,
                        reason: reason.to_string(),
                    },
                );
            }
        }

        if self.workers.len() >= self.config.max_workers {
            log_worker!(
                worker_id,
                "restart-skipped",
                reason,
                max_workers = self.config.max_workers
            );
            return Ok(());
        }

        self.restart_counts.insert(worker_id, attempts + 1);
        log_worker!(worker_id, "restarting", attempt = attempts + 1, reason);
        self.create_worker(worker_id)
    }

    fn schedule_restart(&mut self, worker_id: WorkerId) {
        let attempts = self.restart_counts.get(&worker_id).copied().unwrap_or(0);
        if attempts >= self.config.max_restart_attempts {
            let error = self.abandon_slot(worker_id);
            log_error!(error, worker_id = %worker_id, "worker slot abandoned");
            return;
        }
        if self.pending_restarts.iter().any(|p| p.worker_id == worker_id) {
            return;
        }

        self.pending_restarts.push(PendingRestart {
            worker_id,
            due: Instant::now() + self.config.restart_delay,
        });
        log_worker!(
            worker_id,
            "restart-scheduled",
            attempt = attempts + 1,
            delay_ms = self.config.restart_delay.as_millis() as u64
        );
    }

    fn process_pending_restarts(&mut self) {
        if self.pending_restarts.is_empty() {
            return;
        }

        let now = Instant::now();
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending_restarts)
            .into_iter()
            .partition(|p| p.due <= now);
        self.pending_restarts = waiting;

        for restart in due {
            if let Err(e) = self.restart_worker(restart.worker_id, "scheduled restart") {
                log_error!(e, worker_id = %restart.worker_id, "restart failed");
            }
        }
    }

    /// Drop a slot for good. The pool runs with one worker less until the
    /// scaler tops it back up under a new id.
    fn abandon_slot(&mut self, worker_id: WorkerId) -> WorkerError {
        if let Some(mut worker) = self.workers.remove(&worker_id) {
            if let Some(task_id) = worker.terminate() {
                self.fail_task(
                    task_id,
                    TaskError::WorkerTerminated {
                        worker: worker_id,
                        reason: "restart limit reached".to_string(),
                    },
                );
            }
        }
        WorkerError::RestartLimitExceeded {
            worker: worker_id,
            limit: self.config.max_restart_attempts,
        }
    }

    /// The unit raised an error. The handle stays registered as `Error`
    /// until its restart comes due.
    fn handle_fault(&mut self, worker_id: WorkerId, cause: String) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return;
        };
        let task = worker.mark_error();
        log_error!(cause, worker_id = %worker_id, "worker fault");

        if let Some(task_id) = task {
            self.fail_task(task_id, TaskError::WorkerFault { worker: worker_id, cause });
        }
        self.schedule_restart(worker_id);
    }

    /// The unit went away on its own.
    fn handle_exit(&mut self, worker_id: WorkerId, reason: String) {
        let Some(mut worker) = self.workers.remove(&worker_id) else {
            return;
        };
        log_worker!(worker_id, "exited", reason = %reason);

        if let Some(task_id) = worker.terminate() {
            self.fail_task(task_id, TaskError::WorkerExited { worker: worker_id, reason });
        }
        self.schedule_restart(worker_id);
    }

    /// Terminate and remove a worker without replacing it.
    fn retire_worker(&mut self, worker_id: WorkerId, reason: &str) {
        let Some(mut worker) = self.workers.remove(&worker_id) else {
            return;
        };
        log_worker!(worker_id, "retired", reason);

        if let Some(task_id) = worker.terminate() {
            self.fail_task(
                task_id,
                TaskError::WorkerTerminated {
                    worker: worker_id,
                    reason: reason.to_string(),
                },
            );
        }
    }

    fn run_health_check(&mut self) {
        let report = self.health.inspect(self.workers.values(), Instant::now());
        if report.is_empty() {
            return;
        }

        for worker_id in report.stuck {
            self.handle_stuck(worker_id);
        }
        for worker_id in report.evict {
            self.retire_worker(worker_id, "idle timeout");
        }
        for worker_id in report.probe {
            if let Some(worker) = self.workers.get(&worker_id) {
                if let Err(e) = worker.send(WorkerCommand::HealthCheck) {
                    debug!(worker_id = %worker_id, error = %e, "health probe not delivered");
                }
            }
        }

        // A stuck restart may have freed capacity.
        self.dispatch();
    }

    fn handle_stuck(&mut self, worker_id: WorkerId) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            return;
        };
        let status = worker.status();
        let task = worker.mark_error();
        warn!(
            worker_id = %worker_id,
            status = ?status,
            timeout_ms = self.config.worker_timeout.as_millis() as u64,
            "worker stuck"
        );

        if let Some(task_id) = task {
            self.fail_task(
                task_id,
                TaskError::Timeout {
                    worker: worker_id,
                    timeout: self.config.worker_timeout,
                },
            );
        }
        if let Err(e) = self.restart_worker(worker_id, "worker timeout") {
            log_error!(e, worker_id = %worker_id, "stuck worker not restarted");
        }
    }

    fn scaling_input(&self) -> ScalingInput {
        let mut busy_workers = 0;
        let mut idle_workers = 0;
        for worker in self.workers.values() {
            match worker.status() {
                WorkerStatus::Busy => busy_workers += 1,
                status if status.is_available() => idle_workers += 1,
                _ => {}
            }
        }

        ScalingInput {
            queue_length: self.queue.len(),
            total_workers: self.workers.len(),
            busy_workers,
            idle_workers,
            pending_restarts: self.pending_restarts.len(),
        }
    }

    /// Evaluate the scaling policy once and apply its decision.
    pub(crate) fn apply_scaling(&mut self) {
        let input = self.scaling_input();
        match self.scaling.evaluate(&input) {
            ScalingDecision::Hold => {}
            ScalingDecision::ScaleUp(reason) => {
                log_pool!(
                    "scale-up",
                    reason = %reason,
                    workers = input.total_workers,
                    queued = input.queue_length
                );
                self.spawn_worker();
            }
            ScalingDecision::ScaleDown => {
                let victim = self
                    .workers
                    .values()
                    .filter(|w| w.is_available())
                    .min_by_key(|w| w.last_activity())
                    .map(WorkerHandle::id);
                if let Some(worker_id) = victim {
                    log_pool!("scale-down", worker_id = %worker_id, workers = input.total_workers);
                    self.retire_worker(worker_id, "scale down");
                }
            }
        }
    }

    fn metrics_snapshot(&self) -> PoolMetrics {
        let busy = self
            .workers
            .values()
            .filter(|w| w.status() == WorkerStatus::Busy)
            .count();
        self.metrics
            .snapshot(self.queue.len(), self.running.len(), self.workers.len(), busy)
    }

    fn status(&self) -> PoolStatus {
        PoolStatus {
            workers: self.workers.values().map(WorkerHandle::snapshot).collect(),
            queue: QueueSummary {
                length: self.queue.len(),
                running: self.running.len(),
                completed: self.metrics.completed_count(),
                failed: self.metrics.failed_count(),
                blocked: self.blocked.iter().map(|b| b.specs.len()).sum(),
            },
            metrics: self.metrics_snapshot(),
        }
    }

    fn completion_report(&self) -> CompletionReport {
        CompletionReport {
            completed: self.completed.to_vec(),
            failed: self.failed.to_vec(),
            metrics: self.metrics_snapshot(),
        }
    }

    fn resolve_idle_waiters(&mut self) {
        if self.idle_waiters.is_empty() {
            return;
        }

        let drained = self.queue.is_empty() && self.running.is_empty() && self.blocked.is_empty();
        if !drained {
            self.idle_waiters.retain(|waiter| !waiter.is_closed());
            return;
        }

        let report = self.completion_report();
        for waiter in self.idle_waiters.drain(..) {
            let _ = waiter.send(report.clone());
        }
    }

    fn shutdown(&mut self) {
        log_pool!(
            "stopping",
            workers = self.workers.len(),
            queued = self.queue.len(),
            running = self.running.len()
        );

        for worker in self.workers.values_mut() {
            worker.terminate();
        }
        self.workers.clear();
        self.pending_restarts.clear();

        let running: Vec<TaskId> = self.running.keys().copied().collect();
        for task_id in running {
            self.fail_task(task_id, TaskError::PoolStopped);
        }

        // Queued tasks never started; they are dropped without a terminal event.
        let dropped = self.queue.drain().count();
        if dropped > 0 {
            debug!(dropped, "queued tasks discarded on stop");
        }

        for BlockedSubmit { reply, .. } in self.blocked.drain(..) {
            let _ = reply.send(Err(PoolError::Stopped));
        }
        // Dropping the senders resolves waiters with `PoolError::Stopped`.
        self.idle_waiters.clear();

        self.completed.clear();
        self.failed.clear();
    }
}

fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
