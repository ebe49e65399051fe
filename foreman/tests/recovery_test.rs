
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use foreman::{PoolConfig, TaskError, TaskPool, TaskSpec, WorkerStatus};
use foreman_api::{TaskHandler, TaskRequest, WorkerId, WorkerSettings};
use test_helpers::{fast_config, start_pool, wait_until, DRAIN_TIMEOUT};

#[tokio::test]
async fn test_worker_crash_fails_only_its_task_and_is_restarted() -> anyhow::Result<()> {
    let pool = start_pool(PoolConfig {
        min_workers: 2,
        max_workers: 2,
        ..fast_config()
    })?;
    wait_until(&pool, Duration::from_secs(2), |s| {
        s.workers.iter().filter(|w| w.status.is_available()).count() == 2
    })
    .await?;

    let crashed = pool.submit(TaskSpec::new("panic", json!(null))).await?;
    let survivor = pool.submit(TaskSpec::new("sleep", json!(100))).await?;
    let report = pool.wait_for_completion(DRAIN_TIMEOUT).await?;

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, crashed);
    match &report.failed[0].error {
        Some(error @ TaskError::WorkerFault { cause, .. }) => {
            assert!(cause.contains("handler crashed"));
            assert!(error.to_string().contains("Worker error"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].id, survivor);

    // The slot comes back under the same id.
    let status = wait_until(&pool, Duration::from_secs(2), |s| {
        s.workers.len() == 2 && s.workers.iter().any(|w| w.restart_count == 1 && w.status.is_available())
    })
    .await?;
    let restarted = status.workers.iter().find(|w| w.restart_count == 1).unwrap();
    assert!(restarted.id.get() < 2);

    let next = pool.submit(TaskSpec::new("echo", json!("after"))).await?;
    let report = pool.wait_for_completion(DRAIN_TIMEOUT).await?;
    assert!(report.completed.iter().any(|t| t.id == next));

    pool.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_stuck_worker_is_timed_out_and_replaced() -> anyhow::Result<()> {
    let pool = start_pool(PoolConfig {
        min_workers: 1,
        max_workers: 1,
        worker_timeout: Duration::from_millis(200),
        health_check_interval: Duration::from_millis(100),
        ..fast_config()
    })?;

    let stuck = pool.submit(TaskSpec::new("hang", json!(null))).await?;
    let started = std::time::Instant::now();
    let report = pool.wait_for_completion(Duration::from_secs(3)).await?;

    // health interval + worker timeout, plus scheduling slack
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].id, stuck);
    assert!(matches!(
        report.failed[0].error,
        Some(TaskError::Timeout { timeout, .. }) if timeout == Duration::from_millis(200)
    ));

    let status = wait_until(&pool, Duration::from_secs(2), |s| {
        s.workers.len() == 1 && s.workers[0].status.is_available()
    })
    .await?;
    assert_eq!(status.workers[0].id, WorkerId::new(0));
    assert_eq!(status.workers[0].restart_count, 1);

    pool.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_restarts_are_capped_per_worker_id() -> anyhow::Result<()> {
    let pool = start_pool(PoolConfig {
        min_workers: 1,
        max_workers: 1,
        max_restart_attempts: 2,
        ..fast_config()
    })?;

    let specs = (0..3).map(|_| TaskSpec::new("panic", json!(null))).collect();
    pool.add_tasks(specs).await?;

    let report = pool.wait_for_completion(DRAIN_TIMEOUT).await?;
    assert_eq!(report.failed.len(), 3);
    assert!(report
        .failed
        .iter()
        .all(|t| matches!(t.error, Some(TaskError::WorkerFault { .. }))));

    // Worker 0 used up its restarts; the floor brings in a fresh id.
    let status = wait_until(&pool, Duration::from_secs(2), |s| {
        s.workers.len() == 1 && s.workers[0].id != WorkerId::new(0) && s.workers[0].status.is_available()
    })
    .await?;
    assert_eq!(status.workers[0].restart_count, 0);

    pool.stop().await?;
    Ok(())
}

/// Fails its first `failures` initializations.
struct FlakyStart {
    failures: usize,
    attempts: AtomicUsize,
}

#[async_trait]
impl TaskHandler for FlakyStart {
    async fn initialize(&self, _worker_id: WorkerId, _settings: &WorkerSettings) -> anyhow::Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            anyhow::bail!("browser did not launch");
        }
        Ok(())
    }

    async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value> {
        Ok(task.payload)
    }
}

#[tokio::test]
async fn test_failed_initialization_is_restarted() -> anyhow::Result<()> {
    foreman::logging::init_test();
    let handler = Arc::new(FlakyStart {
        failures: 1,
        attempts: AtomicUsize::new(0),
    });
    let pool = TaskPool::builder(PoolConfig {
        min_workers: 1,
        max_workers: 1,
        ..fast_config()
    })
    .with_handler(handler.clone())
    .start()?;

    let status = wait_until(&pool, Duration::from_secs(2), |s| {
        s.workers.len() == 1 && s.workers[0].status == WorkerStatus::Ready
    })
    .await?;
    assert_eq!(status.workers[0].id, WorkerId::new(0));
    assert_eq!(status.workers[0].restart_count, 1);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);

    let id = pool.submit(TaskSpec::new("echo", json!("ok"))).await?;
    let report = pool.wait_for_completion(DRAIN_TIMEOUT).await?;
    assert_eq!(report.completed[0].id, id);

    pool.stop().await?;
    Ok(())
}

/// First initialization never returns; later ones succeed.
struct HangingStart {
    attempts: AtomicUsize,
}

#[async_trait]
impl TaskHandler for HangingStart {
    async fn initialize(&self, _worker_id: WorkerId, _settings: &WorkerSettings) -> anyhow::Result<()> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn execute(&self, task: TaskRequest) -> anyhow::Result<Value> {
        Ok(task.payload)
    }
}

#[tokio::test]
async fn test_hung_initialization_is_timed_out_and_restarted() -> anyhow::Result<()> {
    foreman::logging::init_test();
    let handler = Arc::new(HangingStart {
        attempts: AtomicUsize::new(0),
    });
    let pool = TaskPool::builder(PoolConfig {
        min_workers: 1,
        max_workers: 1,
        worker_timeout: Duration::from_millis(200),
        health_check_interval: Duration::from_millis(100),
        ..fast_config()
    })
    .with_handler(handler.clone())
    .start()?;

    let id = pool.submit(TaskSpec::new("echo", json!("late"))).await?;
    let report = pool.wait_for_completion(Duration::from_secs(3)).await?;
    assert_eq!(report.completed.len(), 1);
    assert_eq!(report.completed[0].id, id);
    assert!(report.failed.is_empty());

    let status = pool.status().await?;
    assert_eq!(status.workers.len(), 1);
    assert_eq!(status.workers[0].id, WorkerId::new(0));
    assert_eq!(status.workers[0].restart_count, 1);
    assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);

    pool.stop().await?;
    Ok(())
}
