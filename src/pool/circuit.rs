//! Circuit breaker guarding connection creation
//!
//! A three-state machine:
//! - Closed: normal operation, connection attempts are allowed
//! - Open: the database appears down, attempts are rejected without trying
//! - HalfOpen: recovery trial window after the open timeout elapses
//!
//! Only connection-creation failures count against the breaker; errors
//! inside an already-checked-out unit of work never do.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use super::error::PoolError;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation - connection attempts are allowed
    Closed,

    /// Repeated creation failures - attempts are rejected until the timeout
    Open {
        /// When the circuit opened
        opened_at: Instant,
    },

    /// Recovery trial - attempts are allowed; the first success closes
    HalfOpen,
}

impl CircuitState {
    /// Snapshot-facing state name.
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

struct CircuitInner {
    state: CircuitState,
    failures: u32,
    /// Wall-clock counterpart of `Open::opened_at`, kept for snapshots.
    opened_at_utc: Option<DateTime<Utc>>,
}

/// Circuit fields as exposed by the metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub circuit_state: &'static str,
    pub circuit_failures: u32,
    pub circuit_opened_at: Option<DateTime<Utc>>,
}

/// Three-state circuit breaker over connection creation.
pub struct CircuitBreaker {
    failure_threshold: u32,
    timeout: Duration,
    inner: Mutex<CircuitInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            timeout,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at_utc: None,
            }),
        }
    }

    /// Gate a checkout. Closed and HalfOpen proceed without blocking; Open
    /// either transitions to HalfOpen once the timeout has elapsed or fails
    /// fast with a retry-after hint.
    pub fn check_before_attempt(&self) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open { opened_at } => {
                let elapsed = opened_at.elapsed();
                if elapsed > self.timeout {
                    warn!("circuit breaker entering half-open state");
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(PoolError::CircuitOpen {
                        retry_after: self.timeout - elapsed,
                    })
                }
            }
        }
    }

    /// Record one connection-creation failure; open the circuit once the
    /// threshold is reached.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures += 1;

        if inner.failures >= self.failure_threshold
            && !matches!(inner.state, CircuitState::Open { .. })
        {
            warn!(failures = inner.failures, "circuit breaker opened");
            inner.state = CircuitState::Open {
                opened_at: Instant::now(),
            };
            inner.opened_at_utc = Some(Utc::now());
        }
    }

    /// Record a committed unit of work. Restores a non-closed circuit to
    /// Closed and resets the failure counter.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            warn!("circuit breaker closed, database has recovered");
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.opened_at_utc = None;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock().unwrap();
        CircuitSnapshot {
            circuit_state: inner.state.name(),
            circuit_failures: inner.failures,
            circuit_opened_at: inner.opened_at_utc,
        }
    }
}
