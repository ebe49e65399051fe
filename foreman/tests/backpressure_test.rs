
use std::time::Duration;

use serde_json::json;

use foreman::{BackpressureStrategy, PoolConfig, PoolError, TaskSpec};
use test_helpers::{fast_config, start_pool, wait_until};

/// No workers and no scaling within the test, so submissions stay queued.
fn idle_config(capacity: usize, backpressure: BackpressureStrategy) -> PoolConfig {
    PoolConfig {
        min_workers: 0,
        max_workers: 1,
        task_queue_capacity: capacity,
        backpressure,
        scale_interval: Duration::from_secs(60),
        ..fast_config()
    }
}

#[tokio::test]
async fn test_reject_when_full() -> anyhow::Result<()> {
    let pool = start_pool(idle_config(2, BackpressureStrategy::Reject))?;

    pool.submit(TaskSpec::new("echo", json!(1))).await?;
    pool.submit(TaskSpec::new("echo", json!(2))).await?;
    let third = pool.submit(TaskSpec::new("echo", json!(3))).await;
    assert_eq!(third, Err(PoolError::QueueFull { capacity: 2 }));

    let status = pool.status().await?;
    assert_eq!(status.queue.length, 2);
    assert_eq!(status.metrics.total_submitted, 2);

    pool.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_batch_is_all_or_nothing() -> anyhow::Result<()> {
    let pool = start_pool(idle_config(3, BackpressureStrategy::Reject))?;

    pool.submit(TaskSpec::new("echo", json!(0))).await?;
    let batch = (1..4).map(|i| TaskSpec::new("echo", json!(i))).collect();
    assert_eq!(pool.add_tasks(batch).await, Err(PoolError::QueueFull { capacity: 3 }));
    assert_eq!(pool.status().await?.queue.length, 1);

    assert!(pool.add_tasks(Vec::new()).await?.is_empty());

    pool.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_oversized_batch_rejected_even_when_blocking() -> anyhow::Result<()> {
    let pool = start_pool(idle_config(2, BackpressureStrategy::Block))?;

    let batch = (0..3).map(|i| TaskSpec::new("echo", json!(i))).collect();
    assert_eq!(pool.add_tasks(batch).await, Err(PoolError::QueueFull { capacity: 2 }));

    pool.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_block_parks_submitter_until_stop() -> anyhow::Result<()> {
    let pool = start_pool(idle_config(1, BackpressureStrategy::Block))?;
    pool.submit(TaskSpec::new("echo", json!(1))).await?;

    let parked = pool.clone();
    let waiting = tokio::spawn(async move { parked.submit(TaskSpec::new("echo", json!(2))).await });

    let status = wait_until(&pool, Duration::from_secs(1), |s| s.queue.blocked == 1).await?;
    assert_eq!(status.queue.length, 1);
    assert!(!waiting.is_finished());

    pool.stop().await?;
    assert_eq!(waiting.await?, Err(PoolError::Stopped));
    Ok(())
}

#[tokio::test]
async fn test_block_admits_in_order_as_queue_drains() -> anyhow::Result<()> {
    let pool = start_pool(PoolConfig {
        min_workers: 1,
        max_workers: 1,
        task_queue_capacity: 1,
        backpressure: BackpressureStrategy::Block,
        ..fast_config()
    })?;

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(pool.submit(TaskSpec::new("sleep", json!(10 + i))).await?);
    }

    let report = pool.wait_for_completion(Duration::from_secs(5)).await?;
    let completed: Vec<_> = report.completed.iter().map(|t| t.id).collect();
    assert_eq!(completed, ids);

    pool.stop().await?;
    Ok(())
}
