//! The pool core: checkout/checkin protocol, overflow policy, recycling,
//! and the administrative surface (stats, metrics, health check, shutdown).
//!
//! Shared state and its guards:
//! - idle queue: a tokio mutex over a `VecDeque`, paired with a semaphore
//!   whose permit count always equals the queue length (a permit is added
//!   after each push and forgotten before the matching pop)
//! - overflow counter: its own std mutex
//! - metrics registry and circuit breaker: their own locks internally
//!
//! Lock order where two are needed: overflow before metrics. No other pair
//! is ever held at once, and no lock is held across connection I/O.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;

use super::circuit::CircuitBreaker;
use super::connection::{Connection, Connector, PooledConnection};
use super::error::{BoxError, PoolError};
use super::factory::ConnectionFactory;
use super::metrics::{MetricsRegistry, MetricsSnapshot};

/// Connect timeout for the direct health-check probe.
const HEALTH_CHECK_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Future returned by a unit of work, borrowing the checked-out connection.
pub type WorkFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, BoxError>> + Send + 'c>>;

/// Point-in-time, best-effort view of pool occupancy. Fields are read under
/// their own locks but are not linearizable across each other.
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub pool_size: usize,
    pub available_connections: usize,
    pub in_use_connections: usize,
    pub overflow_connections: usize,
    pub overflow_limit: usize,
}

/// Outcome of [`Pool::health_check`], serialized with a `status` tag.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthReport {
    Healthy {
        latency_ms: f64,
        pool_stats: PoolStats,
        connection_metrics: MetricsSnapshot,
        timestamp: DateTime<Utc>,
    },
    Unhealthy {
        error: String,
        failures: u64,
        timestamp: DateTime<Utc>,
    },
}

/// Fixed-size connection pool with bounded overflow, age-based recycling,
/// a circuit breaker over connection creation, and live metrics.
///
/// Construct one at application startup with [`Pool::connect`] and pass it
/// by reference to every consumer; shut it down with [`Pool::close_all`].
pub struct Pool<F: Connector> {
    config: PoolConfig,
    idle: Mutex<VecDeque<PooledConnection<F::Conn>>>,
    idle_slots: Semaphore,
    overflow: StdMutex<usize>,
    metrics: Arc<MetricsRegistry>,
    breaker: Arc<CircuitBreaker>,
    factory: ConnectionFactory<F>,
}

impl<F: Connector> Pool<F> {
    /// Build the pool and eagerly create all `pool_size` connections.
    /// Fail-fast: construction aborts on the first creation that exhausts
    /// its retries.
    pub async fn connect(config: PoolConfig, connector: F) -> Result<Self, PoolError> {
        let metrics = Arc::new(MetricsRegistry::default());
        let breaker = Arc::new(CircuitBreaker::new(
            config.circuit_failure_threshold,
            config.circuit_recovery_after(),
        ));
        let factory = ConnectionFactory::new(
            connector,
            config.connect_timeout(),
            config.max_retry_attempts,
            Arc::clone(&metrics),
            Arc::clone(&breaker),
        );

        let pool = Self {
            idle: Mutex::new(VecDeque::with_capacity(config.pool_size)),
            idle_slots: Semaphore::new(0),
            overflow: StdMutex::new(0),
            metrics,
            breaker,
            factory,
            config,
        };

        for _ in 0..pool.config.pool_size {
            let conn = pool.factory.create().await?;
            pool.idle.lock().await.push_back(conn);
            pool.idle_slots.add_permits(1);
        }

        info!(
            pool_size = pool.config.pool_size,
            host = %pool.config.host,
            port = pool.config.port,
            database = %pool.config.database,
            "connection pool initialised"
        );
        Ok(pool)
    }

    /// Run one unit of work on a pooled connection.
    ///
    /// The circuit breaker is consulted before any connection is touched.
    /// On normal completion the transaction is committed and the success is
    /// reported to the breaker; on any failure the transaction is rolled
    /// back, the error counter is incremented, and the failure is returned
    /// unchanged as [`PoolError::Work`]. The connection is returned to the
    /// pool on every exit path.
    pub async fn with_connection<T, W>(&self, work: W) -> Result<T, PoolError>
    where
        W: for<'c> FnOnce(&'c mut F::Conn) -> WorkFuture<'c, T>,
    {
        self.breaker.check_before_attempt()?;

        let checkout_start = Instant::now();
        let mut pooled = self.acquire().await?;
        let checkout_ms = checkout_start.elapsed().as_secs_f64() * 1000.0;
        self.metrics.record_checkout(checkout_ms);

        let outcome = match work(pooled.raw_mut()).await {
            Ok(value) => match pooled.raw_mut().commit().await {
                Ok(()) => {
                    self.breaker.record_success();
                    Ok(value)
                }
                Err(e) => {
                    self.rollback_quietly(&mut pooled).await;
                    self.metrics.record_error();
                    error!(conn_id = pooled.id(), error = %e, "commit failed");
                    Err(PoolError::Work(e))
                }
            },
            Err(e) => {
                self.rollback_quietly(&mut pooled).await;
                self.metrics.record_error();
                error!(conn_id = pooled.id(), error = %e, "unit of work failed");
                Err(PoolError::Work(e))
            }
        };

        self.release(pooled).await;
        self.metrics.record_checkin();
        outcome
    }

    /// Obtain a connection: idle reuse, overflow creation, or bounded wait.
    async fn acquire(&self) -> Result<PooledConnection<F::Conn>, PoolError> {
        if let Some(conn) = self.try_dequeue().await {
            return self.validate(conn).await;
        }

        debug!("connection pool is empty, checking overflow capacity");
        let can_overflow = {
            let mut overflow = self.overflow.lock().unwrap();
            if *overflow < self.config.max_overflow {
                *overflow += 1;
                self.metrics.set_overflow(*overflow);
                debug!(
                    overflow = *overflow,
                    limit = self.config.max_overflow,
                    "creating an overflow connection"
                );
                true
            } else {
                false
            }
        };

        if can_overflow {
            return match self.factory.create().await {
                Ok(conn) => Ok(conn),
                Err(e) => {
                    // Give the reserved overflow slot back.
                    let mut overflow = self.overflow.lock().unwrap();
                    *overflow -= 1;
                    self.metrics.set_overflow(*overflow);
                    Err(e)
                }
            };
        }

        let wait = self.config.checkout_wait();
        warn!(
            wait_secs = wait.as_secs(),
            "connection pool overflowed, waiting for a checkin"
        );
        match tokio::time::timeout(wait, self.idle_slots.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                let conn = self
                    .idle
                    .lock()
                    .await
                    .pop_front()
                    .expect("idle permit held but queue empty");
                // Was validated when it last entered circulation.
                Ok(conn)
            }
            Ok(Err(_)) | Err(_) => Err(PoolError::Exhausted { waited: wait }),
        }
    }

    /// Non-blocking idle dequeue; `None` when the queue is empty.
    async fn try_dequeue(&self) -> Option<PooledConnection<F::Conn>> {
        match self.idle_slots.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Some(
                    self.idle
                        .lock()
                        .await
                        .pop_front()
                        .expect("idle permit held but queue empty"),
                )
            }
            Err(_) => None,
        }
    }

    /// Recycle a dequeued connection that is over age or fails its liveness
    /// probe; otherwise hand it back as-is.
    async fn validate(
        &self,
        mut conn: PooledConnection<F::Conn>,
    ) -> Result<PooledConnection<F::Conn>, PoolError> {
        let stale = conn.is_stale(self.config.recycle_after());
        let alive = if stale {
            false
        } else {
            match conn.raw_mut().ping().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(conn_id = conn.id(), error = %e, "liveness probe failed");
                    false
                }
            }
        };

        if stale || !alive {
            debug!(conn_id = conn.id(), stale, "recycling connection");
            self.close_connection(conn).await;
            return self.factory.create().await;
        }
        Ok(conn)
    }

    /// Return a connection to the pool, or close it if it was overflow.
    async fn release(&self, mut pooled: PooledConnection<F::Conn>) {
        // Defensive: clear whatever the caller left uncommitted.
        self.rollback_quietly(&mut pooled).await;

        let mut idle = self.idle.lock().await;
        if idle.len() < self.config.pool_size {
            idle.push_back(pooled);
            drop(idle);
            self.idle_slots.add_permits(1);
        } else {
            drop(idle);
            // A full queue means this was an overflow connection; those are
            // closed rather than retained.
            let remaining = {
                let mut overflow = self.overflow.lock().unwrap();
                *overflow = overflow.saturating_sub(1);
                self.metrics.set_overflow(*overflow);
                *overflow
            };
            let conn_id = pooled.id();
            self.close_connection(pooled).await;
            self.metrics.decr_idle();
            debug!(
                conn_id,
                overflow = remaining,
                limit = self.config.max_overflow,
                "closed overflow connection"
            );
        }
    }

    async fn rollback_quietly(&self, pooled: &mut PooledConnection<F::Conn>) {
        if let Err(e) = pooled.raw_mut().rollback().await {
            warn!(conn_id = pooled.id(), error = %e, "rollback failed");
        }
    }

    async fn close_connection(&self, conn: PooledConnection<F::Conn>) {
        let conn_id = conn.id();
        if let Err(e) = conn.into_raw().close().await {
            warn!(conn_id, error = %e, "error closing connection");
        }
        self.metrics.record_closed();
    }

    /// Best-effort snapshot of pool occupancy.
    pub async fn stats(&self) -> PoolStats {
        let available = self.idle.lock().await.len();
        let overflow = *self.overflow.lock().unwrap();
        PoolStats {
            pool_size: self.config.pool_size,
            available_connections: available,
            in_use_connections: self.config.pool_size.saturating_sub(available),
            overflow_connections: overflow,
            overflow_limit: self.config.max_overflow,
        }
    }

    /// Full metrics snapshot with the circuit breaker fields merged in.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.breaker.snapshot())
    }

    /// Probe the database with a short-lived connection opened outside the
    /// pool, so the check never consumes a pooled slot.
    pub async fn health_check(&self) -> HealthReport {
        let start = Instant::now();

        match self.probe_database().await {
            Ok(()) => {
                let latency_ms = start.elapsed().as_secs_f64() * 1000.0;
                let now = Utc::now();
                self.metrics.record_health_ok(now);
                HealthReport::Healthy {
                    latency_ms: (latency_ms * 100.0).round() / 100.0,
                    pool_stats: self.stats().await,
                    connection_metrics: self.metrics(),
                    timestamp: now,
                }
            }
            Err(e) => {
                let failures = self.metrics.record_health_failure();
                warn!(error = %e, failures, "database health check failed");
                HealthReport::Unhealthy {
                    error: e.to_string(),
                    failures,
                    timestamp: Utc::now(),
                }
            }
        }
    }

    async fn probe_database(&self) -> Result<(), BoxError> {
        let mut conn = self
            .factory
            .connect_direct(HEALTH_CHECK_CONNECT_TIMEOUT)
            .await?;
        let result = conn.health_query().await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "error closing health check connection");
        }
        result
    }

    /// Drain the idle queue and close every connection in it. Connections
    /// currently checked out are not forcibly reclaimed.
    pub async fn close_all(&self) {
        let mut closed = 0usize;
        while let Some(conn) = self.try_dequeue().await {
            self.close_connection(conn).await;
            closed += 1;
        }
        info!(closed, "closed all idle database connections");
    }
}
