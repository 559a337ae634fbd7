//! Integration tests for tenantscale-pool

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tenantscale_pool::*;

/// Hands out numbered connections and counts creates.
#[derive(Default)]
struct CountingFactory {
    created: AtomicUsize,
    fail: AtomicBool,
    /// Creates that fail before `fail` is consulted.
    failures_left: AtomicUsize,
    create_delay: Option<Duration>,
}

#[async_trait]
impl ConnectionFactory for CountingFactory {
    type Connection = usize;

    async fn create(&self, _connection_id: &str) -> PoolResult<usize> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        let scheduled_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scheduled_failure || self.fail.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionFailed("store unreachable".into()));
        }
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn probe(&self, _connection: &usize) -> PoolResult<()> {
        Ok(())
    }
}

fn pool(max: usize, acquire_timeout: Duration) -> ResourcePool<CountingFactory> {
    ResourcePool::new(
        PoolConfig::new(0, max).with_acquire_timeout(acquire_timeout),
        CountingFactory::default(),
    )
    .unwrap()
}

#[tokio::test]
async fn test_sixth_acquire_waits_for_release() {
    let pool = pool(5, Duration::from_secs(5));

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire().await.unwrap());
    }

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiter.is_finished());
    assert_eq!(pool.stats().pending_requests, 1);

    let released = held.pop().unwrap();
    pool.release(&released);

    let handed = waiter.await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&handed, &released));
    assert_eq!(pool.stats().total_connections, 5);
    assert_eq!(pool.stats().active_connections, 5);
}

#[tokio::test]
async fn test_failed_create_wakes_queued_acquire() {
    let factory = CountingFactory {
        failures_left: AtomicUsize::new(1),
        create_delay: Some(Duration::from_millis(50)),
        ..Default::default()
    };
    let pool = ResourcePool::new(
        PoolConfig::new(0, 1).with_acquire_timeout(Duration::from_millis(500)),
        factory,
    )
    .unwrap();

    let first = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = Instant::now();
    let second = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };

    let err = first.await.unwrap().unwrap_err();
    assert!(matches!(err, PoolError::ConnectionFailed(_)));

    let client = second.await.unwrap().unwrap();
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(*client, 0);

    let stats = pool.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.active_connections, 1);
    assert_eq!(stats.pending_requests, 0);
    assert_eq!(stats.failed_connections, 1);
}

#[tokio::test]
async fn test_sixth_acquire_times_out() {
    let pool = pool(5, Duration::from_millis(100));

    let mut held = Vec::new();
    for _ in 0..5 {
        held.push(pool.acquire().await.unwrap());
    }

    let started = Instant::now();
    let err = pool.acquire().await.unwrap_err();

    assert_eq!(err, PoolError::AcquireTimeout(Duration::from_millis(100)));
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(pool.stats().pending_requests, 0);

    // A later release is not misassigned to the timed-out waiter.
    pool.release(&held[0]);
    assert_eq!(pool.stats().idle_connections, 1);
}

#[tokio::test]
async fn test_waiters_are_served_fifo() {
    let pool = pool(1, Duration::from_secs(5));
    let only = pool.acquire().await.unwrap();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut waiters = Vec::new();
    for n in 0..3 {
        let pool = pool.clone();
        let order = order.clone();
        waiters.push(tokio::spawn(async move {
            let conn = pool.acquire().await.unwrap();
            order.lock().push(n);
            pool.release(&conn);
        }));
        // Let each waiter enqueue before the next.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    pool.release(&only);
    for waiter in waiters {
        waiter.await.unwrap();
    }

    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_never_exceeds_max_connections() {
    let pool = pool(4, Duration::from_secs(5));
    let seen = Arc::new(parking_lot::Mutex::new(HashSet::new()));

    let mut tasks = Vec::new();
    for _ in 0..100 {
        let pool = pool.clone();
        let seen = seen.clone();
        tasks.push(tokio::spawn(async move {
            pool.with_connection(|conn| async move {
                seen.lock().insert(*conn);
                tokio::time::sleep(Duration::from_millis(2)).await;
                Ok::<_, PoolError>(())
            })
            .await
        }));
    }

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert!(seen.lock().len() <= 4);
    assert!(pool.stats().total_connections <= 4);
    assert_eq!(pool.factory().created.load(Ordering::SeqCst), pool.stats().total_connections);
}

#[tokio::test]
async fn test_with_connection_releases_on_error() {
    let pool = pool(1, Duration::from_millis(100));

    let result: Result<(), PoolError> = pool
        .with_connection(|_| async { Err(PoolError::Probe("query failed".into())) })
        .await;
    assert!(result.is_err());

    let stats = pool.stats();
    assert_eq!(stats.active_connections, 0);
    assert_eq!(stats.idle_connections, 1);
}

#[tokio::test]
async fn test_with_connection_releases_on_panic() {
    let pool = pool(1, Duration::from_millis(100));

    let task = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.with_connection(|conn| async move {
                if *conn < usize::MAX {
                    panic!("operation blew up");
                }
                Ok::<(), PoolError>(())
            })
            .await
        })
    };
    assert!(task.await.is_err());

    // The single connection is available again.
    let conn = pool.acquire().await.unwrap();
    pool.release(&conn);
}

#[tokio::test]
async fn test_with_batch_collects_in_order() {
    let pool = pool(3, Duration::from_secs(1));

    let results = pool
        .with_batch(
            (0..25).collect(),
            |_, n: u32| async move { Ok::<_, PoolError>(n * 10) },
            DEFAULT_BATCH_SIZE,
        )
        .await
        .unwrap();

    assert_eq!(results, (0..25).map(|n| n * 10).collect::<Vec<_>>());
    assert_eq!(pool.stats().active_connections, 0);
}

#[tokio::test]
async fn test_with_batch_surfaces_first_error() {
    let pool = pool(3, Duration::from_secs(1));

    let err = pool
        .with_batch(
            (0..10).collect(),
            |_, n: u32| async move {
                if n == 4 {
                    Err(PoolError::Probe(format!("item {n} failed")))
                } else {
                    Ok(n)
                }
            },
            5,
        )
        .await
        .unwrap_err();

    assert_eq!(err, PoolError::Probe("item 4 failed".into()));
}

#[tokio::test]
async fn test_close_rejects_waiters() {
    let pool = pool(1, Duration::from_secs(5));
    let _held = pool.acquire().await.unwrap();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    pool.close().await;

    assert_eq!(waiter.await.unwrap().unwrap_err(), PoolError::ShuttingDown);
}

#[tokio::test]
async fn test_create_failure_propagates() {
    let factory = CountingFactory::default();
    factory.fail.store(true, Ordering::SeqCst);
    let pool = ResourcePool::new(PoolConfig::new(0, 2), factory).unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert!(matches!(err, PoolError::ConnectionFailed(_)));

    let stats = pool.stats();
    assert_eq!(stats.failed_connections, 1);
    assert_eq!(stats.total_connections, 0);

    // The reserved slot was returned.
    pool.factory().fail.store(false, Ordering::SeqCst);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn test_slow_create_times_out() {
    let factory = CountingFactory {
        create_delay: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let pool = ResourcePool::new(
        PoolConfig::new(0, 2).with_create_timeout(Duration::from_millis(20)),
        factory,
    )
    .unwrap();

    let err = pool.acquire().await.unwrap_err();
    assert_eq!(err, PoolError::CreateTimeout(Duration::from_millis(20)));
}

#[tokio::test]
async fn test_stats_track_acquire_time() {
    let pool = pool(2, Duration::from_secs(1));
    pool.with_connection(|_| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok::<_, PoolError>(())
    })
    .await
    .unwrap();

    let stats = pool.stats();
    assert_eq!(stats.successful_connections, 1);
    assert!(stats.average_operation_ms > 0.0);
    assert_eq!(pool.connections()[0].query_count, 1);
}
