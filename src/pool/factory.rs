//! Connection factory with retry and exponential backoff
//!
//! Creation failures are swallowed until the retry budget is exhausted, then
//! surfaced once, counted once, and reported once to the circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use super::circuit::CircuitBreaker;
use super::connection::{Connector, PooledConnection};
use super::error::{BoxError, PoolError};
use super::metrics::MetricsRegistry;

/// Delay before the first retry; doubles with each failed attempt.
pub(crate) const BASE_BACKOFF_DELAY: Duration = Duration::from_millis(500);

/// Exponential backoff: `base * 2^attempt` for a zero-based attempt index.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt)
}

/// Creates live, timestamped connections for the pool, retrying with
/// exponential backoff and reporting exhaustion to the circuit breaker.
pub struct ConnectionFactory<F: Connector> {
    connector: F,
    connect_timeout: Duration,
    max_retry_attempts: u32,
    base_delay: Duration,
    metrics: Arc<MetricsRegistry>,
    breaker: Arc<CircuitBreaker>,
}

impl<F: Connector> ConnectionFactory<F> {
    pub fn new(
        connector: F,
        connect_timeout: Duration,
        max_retry_attempts: u32,
        metrics: Arc<MetricsRegistry>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            connector,
            connect_timeout,
            max_retry_attempts,
            base_delay: BASE_BACKOFF_DELAY,
            metrics,
            breaker,
        }
    }

    /// Establish one connection, retrying up to the configured budget.
    ///
    /// On success the connection is stamped with its creation time and
    /// counted; a success on a retry also adds the attempt index to the
    /// retry counter. On exhaustion the error counter and the circuit
    /// breaker each record one failure and the last underlying error is
    /// propagated.
    pub async fn create(&self) -> Result<PooledConnection<F::Conn>, PoolError> {
        let mut last_error: Option<BoxError> = None;

        for attempt in 0..self.max_retry_attempts {
            match self.connector.connect(self.connect_timeout).await {
                Ok(conn) => {
                    let pooled = PooledConnection::new(conn);
                    self.metrics.record_created(attempt);
                    if attempt > 0 {
                        warn!(
                            attempt,
                            max = self.max_retry_attempts,
                            "connection created after retries"
                        );
                    }
                    debug!(conn_id = pooled.id(), "created new database connection");
                    return Ok(pooled);
                }
                Err(e) => {
                    if attempt + 1 < self.max_retry_attempts {
                        let delay = backoff_delay(self.base_delay, attempt);
                        warn!(
                            attempt = attempt + 1,
                            max = self.max_retry_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "connection attempt failed, retrying"
                        );
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        self.metrics.record_error();
        self.breaker.record_failure();
        error!(
            attempts = self.max_retry_attempts,
            "failed to create connection after retries"
        );

        Err(PoolError::Create {
            attempts: self.max_retry_attempts,
            source: last_error.unwrap_or_else(|| "no connection attempt was made".into()),
        })
    }

    /// One un-pooled, un-retried connection, for health checks only.
    /// Touches neither the metrics registry nor the circuit breaker.
    pub async fn connect_direct(&self, timeout: Duration) -> Result<F::Conn, BoxError> {
        self.connector.connect(timeout).await
    }
}
