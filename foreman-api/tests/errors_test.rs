use std::time::Duration;

use foreman_api::{TaskError, WorkerId};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_display() {
        let error = TaskError::Handler("selector not found".to_string());
        assert_eq!(error.to_string(), "Task handler failed: selector not found");
        assert!(!error.is_worker_failure());
    }

    #[test]
    fn test_worker_fault_mentions_worker_error_and_cause() {
        let error = TaskError::WorkerFault {
            worker: WorkerId::new(2),
            cause: "index out of bounds".to_string(),
        };
        let text = error.to_string();
        assert!(text.contains("Worker error"));
        assert!(text.contains("index out of bounds"));
        assert!(error.is_worker_failure());
    }

    #[test]
    fn test_exit_and_timeout_display() {
        let exited = TaskError::WorkerExited {
            worker: WorkerId::new(1),
            reason: "initialization failed".to_string(),
        };
        assert_eq!(exited.to_string(), "Worker 1 exited unexpectedly: initialization failed");

        let timeout = TaskError::Timeout {
            worker: WorkerId::new(4),
            timeout: Duration::from_millis(200),
        };
        assert_eq!(timeout.to_string(), "Task exceeded worker timeout of 200ms on worker 4");
    }

    #[test]
    fn test_pool_stopped_display() {
        assert_eq!(TaskError::PoolStopped.to_string(), "Pool stopped before the task finished");
    }

    #[test]
    fn test_error_survives_json_round_trip() {
        let error = TaskError::WorkerTerminated {
            worker: WorkerId::new(7),
            reason: "scale down".to_string(),
        };
        let encoded = serde_json::to_string(&error).unwrap();
        let decoded: TaskError = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, error);
    }
}
