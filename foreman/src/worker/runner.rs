//! # Worker Protocol Loop
//!
//! The worker side of the coordinator protocol, shared by every bundled
//! execution unit. It turns `WorkerCommand`s into `TaskHandler` calls and
//! handler outcomes into `WorkerEvent`s.
//!
//! ## Core Algorithm
//! 1. Wait for a command
//! 2. `Initialize` runs the handler's initializer and answers `Ready`
//! 3. `ExecuteTask` runs the handler, answering health checks while it runs
//! 4. `HealthCheck` answers with stats and health
//! 5. Repeat until the command channel closes or the worker faults
//!
//! ### Safety Considerations
//! - Handler panics are caught and reported as a `Fault`; the loop then ends
//!   because the handler may have been left in an inconsistent state
//! - A failing initializer is reported as an `Exited` event

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, warn};

use foreman_api::{
    TaskHandler, TaskId, TaskRequest, WorkerCommand, WorkerEvent, WorkerHealth, WorkerId,
    WorkerMessage, WorkerSettings, WorkerStats,
};

use super::unit::EventSender;

/// Run the worker protocol until the command channel closes or the worker
/// can no longer be used.
pub async fn run_worker<H>(
    handler: Arc<H>,
    worker_id: WorkerId,
    instance: u64,
    commands: flume::Receiver<WorkerCommand>,
    events: EventSender,
) where
    H: TaskHandler + ?Sized,
{
    let mut worker = WorkerLoop {
        handler,
        worker_id,
        instance,
        events,
        started: Instant::now(),
        initialized: false,
        completed: 0,
        failed: 0,
    };

    while let Ok(command) = commands.recv_async().await {
        let keep_running = match command {
            WorkerCommand::Initialize { settings, .. } => worker.initialize(&settings).await,
            WorkerCommand::ExecuteTask(request) => worker.execute(request, &commands).await,
            WorkerCommand::HealthCheck => worker.report(None),
        };

        if !keep_running {
            break;
        }
    }

    debug!(worker_id = %worker_id, instance, "worker loop finished");
}

struct WorkerLoop<H: ?Sized> {
    handler: Arc<H>,
    worker_id: WorkerId,
    instance: u64,
    events: EventSender,
    started: Instant,
    initialized: bool,
    completed: u64,
    failed: u64,
}

impl<H> WorkerLoop<H>
where
    H: TaskHandler + ?Sized,
{
    /// Returns false once the coordinator has gone away.
    fn emit(&self, event: WorkerEvent) -> bool {
        self.events
            .send(WorkerMessage::new(self.worker_id, self.instance, event))
            .is_ok()
    }

    async fn initialize(&mut self, settings: &WorkerSettings) -> bool {
        if self.initialized {
            warn!(worker_id = %self.worker_id, "duplicate initialize ignored");
            return true;
        }

        let outcome = AssertUnwindSafe(self.handler.initialize(self.worker_id, settings))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                self.initialized = true;
                self.emit(WorkerEvent::Ready)
            }
            Ok(Err(error)) => {
                self.emit(WorkerEvent::Exited {
                    reason: format!("initialization failed: {:#}", error),
                });
                false
            }
            Err(panic) => {
                self.emit(WorkerEvent::Fault {
                    error: panic_message(panic.as_ref()),
                });
                false
            }
        }
    }

    async fn execute(&mut self, request: TaskRequest, commands: &flume::Receiver<WorkerCommand>) -> bool {
        let task_id = request.id;

        if !self.initialized {
            self.failed += 1;
            return self.emit(WorkerEvent::TaskFailed {
                task_id,
                error: "worker received a task before initialization".to_string(),
            });
        }

        let handler = Arc::clone(&self.handler);
        let execution = AssertUnwindSafe(async move { handler.execute(request).await }).catch_unwind();
        tokio::pin!(execution);

        // Keep answering health checks while the handler runs.
        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break outcome,
                command = commands.recv_async() => match command {
                    Ok(WorkerCommand::HealthCheck) => {
                        if !self.report(Some(task_id)) {
                            return false;
                        }
                    }
                    Ok(other) => {
                        warn!(worker_id = %self.worker_id, command = other.name(), "worker busy, command dropped");
                    }
                    // Terminated mid-task: the execution is dropped with the loop.
                    Err(_) => return false,
                }
            }
        };

        match outcome {
            Ok(Ok(result)) => {
                self.completed += 1;
                self.emit(WorkerEvent::TaskCompleted { task_id, result })
            }
            Ok(Err(error)) => {
                self.failed += 1;
                self.emit(WorkerEvent::TaskFailed {
                    task_id,
                    error: format!("{:#}", error),
                })
            }
            Err(panic) => {
                self.emit(WorkerEvent::Fault {
                    error: panic_message(panic.as_ref()),
                });
                false
            }
        }
    }

    fn report(&self, current_task: Option<TaskId>) -> bool {
        let resource_usage = self.handler.resource_usage();
        let stats = WorkerStats {
            tasks_completed: self.completed,
            tasks_failed: self.failed,
            uptime: self.started.elapsed(),
            resource_usage,
        };
        let health = WorkerHealth {
            healthy: self.initialized,
            current_task,
            resource_usage,
        };

        self.emit(WorkerEvent::Stats(stats)) && self.emit(WorkerEvent::Health(health))
    }
}

/// Render a panic payload as text.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Scripted;

    #[async_trait]
    impl TaskHandler for Scripted {
        async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value> {
            match task.kind.as_str() {
                "ok" => Ok(json!("done")),
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(json!("slow done"))
                }
                "fail" => anyhow::bail!("bad input"),
                _ => panic!("handler exploded"),
            }
        }
    }

    fn request(kind: &str) -> TaskRequest {
        TaskRequest {
            id: TaskId::new(),
            kind: kind.to_string(),
            payload: Value::Null,
            options: Value::Null,
        }
    }

    fn start() -> (flume::Sender<WorkerCommand>, flume::Receiver<WorkerMessage>, tokio::task::JoinHandle<()>) {
        let (command_tx, command_rx) = flume::unbounded();
        let (event_tx, event_rx) = flume::unbounded();
        let join = tokio::spawn(run_worker(Arc::new(Scripted), WorkerId::new(1), 7, command_rx, event_tx));
        command_tx
            .send(WorkerCommand::Initialize {
                worker_id: WorkerId::new(1),
                settings: WorkerSettings::default(),
            })
            .unwrap();
        (command_tx, event_rx, join)
    }

    async fn next(events: &flume::Receiver<WorkerMessage>) -> WorkerMessage {
        tokio::time::timeout(Duration::from_secs(2), events.recv_async())
            .await
            .expect("timed out waiting for worker event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_ready_then_complete_and_fail() {
        let (commands, events, _join) = start();
        let ready = next(&events).await;
        assert_eq!(ready.event, WorkerEvent::Ready);
        assert_eq!(ready.instance, 7);

        let ok = request("ok");
        commands.send(WorkerCommand::ExecuteTask(ok.clone())).unwrap();
        assert_eq!(
            next(&events).await.event,
            WorkerEvent::TaskCompleted { task_id: ok.id, result: json!("done") }
        );

        let fail = request("fail");
        commands.send(WorkerCommand::ExecuteTask(fail.clone())).unwrap();
        match next(&events).await.event {
            WorkerEvent::TaskFailed { task_id, error } => {
                assert_eq!(task_id, fail.id);
                assert!(error.contains("bad input"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_fault_and_ends_loop() {
        let (commands, events, join) = start();
        next(&events).await;

        commands.send(WorkerCommand::ExecuteTask(request("boom"))).unwrap();
        match next(&events).await.event {
            WorkerEvent::Fault { error } => assert!(error.contains("handler exploded")),
            other => panic!("unexpected event {:?}", other),
        }

        tokio::time::timeout(Duration::from_secs(2), join).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_health_check_answered_while_busy() {
        let (commands, events, _join) = start();
        next(&events).await;

        let slow = request("slow");
        commands.send(WorkerCommand::ExecuteTask(slow.clone())).unwrap();
        commands.send(WorkerCommand::HealthCheck).unwrap();

        assert!(matches!(next(&events).await.event, WorkerEvent::Stats(_)));
        match next(&events).await.event {
            WorkerEvent::Health(health) => assert_eq!(health.current_task, Some(slow.id)),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(next(&events).await.event, WorkerEvent::TaskCompleted { .. }));
    }

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "Unknown panic");
    }
}
