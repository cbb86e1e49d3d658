//! Integration tests for the pool core, connection factory, and circuit
//! breaker, exercised end to end against an in-memory mock connector.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dbpool::config::PoolConfig;
use dbpool::pool::{BoxError, Connection, Connector, HealthReport, Pool, PoolError};
use tokio::sync::Barrier;

#[derive(Default)]
struct MockState {
    created: AtomicU64,
    closed: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    fail_connect: AtomicBool,
    fail_ping: AtomicBool,
}

impl MockState {
    fn created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    fn closed(&self) -> u64 {
        self.closed.load(Ordering::SeqCst)
    }

    fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    fn set_fail_ping(&self, fail: bool) {
        self.fail_ping.store(fail, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
struct MockConnector {
    state: Arc<MockState>,
}

struct MockConn {
    state: Arc<MockState>,
}

#[async_trait]
impl Connector for MockConnector {
    type Conn = MockConn;

    async fn connect(&self, _timeout: Duration) -> Result<MockConn, BoxError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err("simulated connect failure".into());
        }
        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConn {
            state: Arc::clone(&self.state),
        })
    }
}

#[async_trait]
impl Connection for MockConn {
    async fn ping(&mut self) -> Result<(), BoxError> {
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err("simulated dead connection".into());
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_query(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    async fn close(self) -> Result<(), BoxError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn build_pool(config: PoolConfig) -> (Arc<Pool<MockConnector>>, Arc<MockState>) {
    let connector = MockConnector::default();
    let state = Arc::clone(&connector.state);
    let pool = Pool::connect(config, connector).await.unwrap();
    (Arc::new(pool), state)
}

#[tokio::test]
async fn sequential_checkouts_reuse_connections() {
    let (pool, state) = build_pool(PoolConfig::for_testing()).await;
    assert_eq!(state.created(), 2);

    for i in 0..5 {
        let value = pool
            .with_connection(move |_conn| Box::pin(async move { Ok::<_, BoxError>(i) }))
            .await
            .unwrap();
        assert_eq!(value, i);
    }

    // Reuse, not re-creation.
    assert_eq!(state.created(), 2);
    assert_eq!(state.commits.load(Ordering::SeqCst), 5);

    let metrics = pool.metrics();
    assert_eq!(metrics.total_checkouts, 5);
    assert_eq!(metrics.total_checkins, 5);
    assert_eq!(metrics.active_connections, 0);
    assert_eq!(metrics.idle_connections, 2);
    assert!(metrics.avg_checkout_time_ms <= metrics.max_checkout_time_ms);
}

#[tokio::test]
async fn overflow_absorbs_spike_and_is_closed_on_return() {
    let (pool, state) = build_pool(PoolConfig::for_testing()).await;

    let holding = Arc::new(Barrier::new(4));
    let releasing = Arc::new(Barrier::new(4));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let pool = Arc::clone(&pool);
        let holding = Arc::clone(&holding);
        let releasing = Arc::clone(&releasing);
        handles.push(tokio::spawn(async move {
            pool.with_connection(move |_conn| {
                Box::pin(async move {
                    holding.wait().await;
                    releasing.wait().await;
                    Ok::<_, BoxError>(())
                })
            })
            .await
            .unwrap();
        }));
    }

    // All three checkouts are outstanding: two from the pool, one overflow.
    holding.wait().await;
    assert_eq!(state.created(), 3);
    let stats = pool.stats().await;
    assert_eq!(stats.available_connections, 0);
    assert_eq!(stats.overflow_connections, 1);
    assert_eq!(stats.overflow_limit, 1);
    assert_eq!(pool.metrics().overflow_connections, 1);

    releasing.wait().await;
    for handle in handles {
        handle.await.unwrap();
    }

    // The overflow connection was closed rather than retained.
    let stats = pool.stats().await;
    assert_eq!(stats.available_connections, 2);
    assert_eq!(stats.overflow_connections, 0);
    assert_eq!(state.closed(), 1);
}

#[tokio::test]
async fn aged_connection_is_recycled_on_checkout() {
    let config = PoolConfig {
        pool_size: 1,
        max_overflow: 0,
        pool_recycle: 0,
        ..PoolConfig::for_testing()
    };
    let (pool, state) = build_pool(config).await;
    assert_eq!(state.created(), 1);

    tokio::time::sleep(Duration::from_millis(5)).await;

    pool.with_connection(|_conn| Box::pin(async move { Ok::<_, BoxError>(()) }))
        .await
        .unwrap();

    // The stale connection was closed and replaced, not handed out.
    assert_eq!(state.closed(), 1);
    assert_eq!(state.created(), 2);
}

#[tokio::test]
async fn dead_connection_is_replaced_on_checkout() {
    let config = PoolConfig {
        pool_size: 1,
        max_overflow: 0,
        ..PoolConfig::for_testing()
    };
    let (pool, state) = build_pool(config).await;
    state.set_fail_ping(true);

    pool.with_connection(|_conn| Box::pin(async move { Ok::<_, BoxError>(()) }))
        .await
        .unwrap();

    assert_eq!(state.closed(), 1);
    assert_eq!(state.created(), 2);
}

#[tokio::test]
async fn circuit_opens_after_threshold_and_recovers() {
    let config = PoolConfig {
        pool_size: 1,
        max_overflow: 1,
        pool_recycle: 0,
        max_retry_attempts: 1,
        circuit_failure_threshold: 3,
        circuit_timeout: 1,
        checkout_timeout: 1,
        ..PoolConfig::for_testing()
    };
    let (pool, state) = build_pool(config).await;
    state.set_fail_connect(true);
    tokio::time::sleep(Duration::from_millis(5)).await;

    // Three checkouts, each exhausting creation retries.
    for _ in 0..3 {
        let result = pool
            .with_connection(|_conn| Box::pin(async move { Ok::<_, BoxError>(()) }))
            .await;
        assert!(matches!(result, Err(PoolError::Create { attempts: 1, .. })));
    }

    let metrics = pool.metrics();
    assert_eq!(metrics.circuit_state, "open");
    assert_eq!(metrics.circuit_failures, 3);
    assert!(metrics.circuit_opened_at.is_some());

    // A fourth attempt fails fast, well under the bounded-wait timeout,
    // with a retry-after hint close to the circuit timeout.
    let start = Instant::now();
    let result = pool
        .with_connection(|_conn| Box::pin(async move { Ok::<_, BoxError>(()) }))
        .await;
    assert!(start.elapsed() < Duration::from_millis(500));
    match result {
        Err(PoolError::CircuitOpen { retry_after }) => {
            assert!(retry_after > Duration::from_millis(500));
            assert!(retry_after <= Duration::from_secs(1));
        }
        other => panic!("expected CircuitOpen, got {other:?}"),
    }

    // After the circuit timeout the next checkout runs as a half-open
    // trial; a committed unit of work closes the circuit again.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    state.set_fail_connect(false);

    pool.with_connection(|_conn| Box::pin(async move { Ok::<_, BoxError>(()) }))
        .await
        .unwrap();

    let metrics = pool.metrics();
    assert_eq!(metrics.circuit_state, "closed");
    assert_eq!(metrics.circuit_failures, 0);
    assert!(metrics.circuit_opened_at.is_none());
}

#[tokio::test]
async fn failed_work_rolls_back_and_returns_connection() {
    let (pool, state) = build_pool(PoolConfig::for_testing()).await;

    let result = pool
        .with_connection(|_conn| {
            Box::pin(async move { Err::<(), BoxError>("boom".into()) })
        })
        .await;
    assert!(matches!(result, Err(PoolError::Work(_))));

    assert!(state.rollbacks.load(Ordering::SeqCst) >= 1);
    assert_eq!(state.commits.load(Ordering::SeqCst), 0);

    // Connection returned, not leaked; error counted; breaker untouched.
    let stats = pool.stats().await;
    assert_eq!(stats.available_connections, 2);
    let metrics = pool.metrics();
    assert_eq!(metrics.total_errors, 1);
    assert_eq!(metrics.circuit_failures, 0);
    assert_eq!(metrics.circuit_state, "closed");
}

#[tokio::test]
async fn bounded_wait_expires_into_exhaustion() {
    let config = PoolConfig {
        pool_size: 1,
        max_overflow: 0,
        checkout_timeout: 1,
        ..PoolConfig::for_testing()
    };
    let (pool, _state) = build_pool(config).await;

    let holding = Arc::new(Barrier::new(2));
    let releasing = Arc::new(Barrier::new(2));

    let holder = {
        let pool = Arc::clone(&pool);
        let holding = Arc::clone(&holding);
        let releasing = Arc::clone(&releasing);
        tokio::spawn(async move {
            pool.with_connection(move |_conn| {
                Box::pin(async move {
                    holding.wait().await;
                    releasing.wait().await;
                    Ok::<_, BoxError>(())
                })
            })
            .await
            .unwrap();
        })
    };

    holding.wait().await;

    let start = Instant::now();
    let result = pool
        .with_connection(|_conn| Box::pin(async move { Ok::<_, BoxError>(()) }))
        .await;
    assert!(matches!(result, Err(PoolError::Exhausted { .. })));
    assert!(start.elapsed() >= Duration::from_millis(900));

    releasing.wait().await;
    holder.await.unwrap();
}

#[tokio::test]
async fn health_check_tracks_consecutive_failures() {
    let (pool, state) = build_pool(PoolConfig::for_testing()).await;

    match pool.health_check().await {
        HealthReport::Healthy {
            latency_ms,
            pool_stats,
            connection_metrics,
            ..
        } => {
            assert!(latency_ms >= 0.0);
            assert_eq!(pool_stats.pool_size, 2);
            assert_eq!(connection_metrics.health_check_failures, 0);
        }
        other => panic!("expected healthy report, got {other:?}"),
    }

    state.set_fail_connect(true);
    match pool.health_check().await {
        HealthReport::Unhealthy { failures, .. } => assert_eq!(failures, 1),
        other => panic!("expected unhealthy report, got {other:?}"),
    }
    match pool.health_check().await {
        HealthReport::Unhealthy { failures, .. } => assert_eq!(failures, 2),
        other => panic!("expected unhealthy report, got {other:?}"),
    }

    // Recovery resets the consecutive failure count.
    state.set_fail_connect(false);
    match pool.health_check().await {
        HealthReport::Healthy {
            connection_metrics, ..
        } => {
            assert_eq!(connection_metrics.health_check_failures, 0);
            assert!(connection_metrics.last_health_check.is_some());
        }
        other => panic!("expected healthy report, got {other:?}"),
    }
}

#[tokio::test]
async fn close_all_drains_the_idle_queue() {
    let (pool, state) = build_pool(PoolConfig::for_testing()).await;

    pool.close_all().await;

    assert_eq!(state.closed(), 2);
    let stats = pool.stats().await;
    assert_eq!(stats.available_connections, 0);
}
