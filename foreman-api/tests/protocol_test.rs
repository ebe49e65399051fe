use async_trait::async_trait;
use serde_json::{json, Value};

use foreman_api::{
    ResourceUsage, TaskHandler, TaskId, TaskRequest, WorkerCommand, WorkerEvent, WorkerId,
    WorkerMessage, WorkerSettings,
};

struct Upper;

#[async_trait]
impl TaskHandler for Upper {
    async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value> {
        match task.payload.as_str() {
            Some(text) => Ok(Value::String(text.to_uppercase())),
            None => anyhow::bail!("payload for {} is not a string", task.kind),
        }
    }
}

fn request(payload: Value) -> TaskRequest {
    TaskRequest {
        id: TaskId::new(),
        kind: "upper".to_string(),
        payload,
        options: Value::Null,
    }
}

#[tokio::test]
async fn test_handler_defaults() {
    let handler = Upper;
    let settings = WorkerSettings::default();

    assert!(handler.initialize(WorkerId::new(0), &settings).await.is_ok());
    assert_eq!(handler.resource_usage(), ResourceUsage::default());
}

#[tokio::test]
async fn test_handler_success_and_failure() {
    let handler = Upper;

    let ok = handler.execute(request(json!("abc"))).await.unwrap();
    assert_eq!(ok, json!("ABC"));

    let err = handler.execute(request(json!(42))).await.unwrap_err();
    assert!(err.to_string().contains("not a string"));
}

#[test]
fn test_wire_names() {
    assert_eq!(WorkerCommand::HealthCheck.name(), "health-check");
    assert_eq!(WorkerCommand::ExecuteTask(request(Value::Null)).name(), "execute-task");
    assert_eq!(WorkerEvent::Ready.name(), "worker-ready");
    assert_eq!(
        WorkerEvent::TaskFailed { task_id: TaskId::new(), error: "x".into() }.name(),
        "task-failed"
    );
    assert_eq!(WorkerEvent::Exited { reason: "gone".into() }.name(), "worker-exit");
}

#[test]
fn test_message_carries_instance() {
    let message = WorkerMessage::new(WorkerId::new(5), 12, WorkerEvent::Ready);
    assert_eq!(message.worker_id.get(), 5);
    assert_eq!(message.instance, 12);
    assert_eq!(message.worker_id.to_string(), "5");
}
