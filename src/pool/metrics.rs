//! Live usage metrics for the pool
//!
//! A plain aggregate of counters, gauges and timing stats behind one lock.
//! Mutators take the lock briefly and never hold it across an await; reads
//! produce an eventually-consistent snapshot, not a linearizable view.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::circuit::CircuitSnapshot;

#[derive(Debug, Default, Clone)]
struct Metrics {
    total_connections_created: u64,
    total_connections_closed: u64,
    total_checkouts: u64,
    total_checkins: u64,
    total_errors: u64,
    total_retries: u64,

    active_connections: i64,
    idle_connections: i64,
    overflow_connections: u64,

    avg_checkout_time_ms: f64,
    max_checkout_time_ms: f64,

    last_health_check: Option<DateTime<Utc>>,
    health_check_failures: u64,
}

/// Serializable point-in-time view of the registry, with the circuit
/// breaker fields merged in.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_connections_created: u64,
    pub total_connections_closed: u64,
    pub total_checkouts: u64,
    pub total_checkins: u64,
    pub total_errors: u64,
    pub total_retries: u64,

    pub active_connections: i64,
    pub idle_connections: i64,
    pub overflow_connections: u64,

    pub avg_checkout_time_ms: f64,
    pub max_checkout_time_ms: f64,

    pub circuit_state: &'static str,
    pub circuit_failures: u32,
    pub circuit_opened_at: Option<DateTime<Utc>>,

    pub last_health_check: Option<DateTime<Utc>>,
    pub health_check_failures: u64,
}

/// Counters, gauges and timing stats for the pool, guarded by its own lock.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    inner: Mutex<Metrics>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl MetricsRegistry {
    /// A connection was created; `retries` is the zero-based attempt index
    /// the creation succeeded on.
    pub fn record_created(&self, retries: u32) {
        let mut m = self.inner.lock().unwrap();
        m.total_connections_created += 1;
        m.idle_connections += 1;
        if retries > 0 {
            m.total_retries += u64::from(retries);
        }
    }

    pub fn record_closed(&self) {
        self.inner.lock().unwrap().total_connections_closed += 1;
    }

    /// A checkout completed; folds the observed latency into the running
    /// average and maximum.
    pub fn record_checkout(&self, latency_ms: f64) {
        let mut m = self.inner.lock().unwrap();
        m.total_checkouts += 1;
        m.active_connections += 1;
        m.idle_connections -= 1;

        let n = m.total_checkouts as f64;
        m.avg_checkout_time_ms = (m.avg_checkout_time_ms * (n - 1.0) + latency_ms) / n;
        m.max_checkout_time_ms = m.max_checkout_time_ms.max(latency_ms);
    }

    pub fn record_checkin(&self) {
        let mut m = self.inner.lock().unwrap();
        m.active_connections -= 1;
        m.total_checkins += 1;
        m.idle_connections += 1;
    }

    pub fn record_error(&self) {
        self.inner.lock().unwrap().total_errors += 1;
    }

    pub fn set_overflow(&self, count: usize) {
        self.inner.lock().unwrap().overflow_connections = count as u64;
    }

    /// An overflow connection left the pool for good.
    pub fn decr_idle(&self) {
        self.inner.lock().unwrap().idle_connections -= 1;
    }

    /// A direct health probe succeeded; failures reset to zero.
    pub fn record_health_ok(&self, at: DateTime<Utc>) {
        let mut m = self.inner.lock().unwrap();
        m.last_health_check = Some(at);
        m.health_check_failures = 0;
    }

    /// A direct health probe failed; returns the new consecutive count.
    pub fn record_health_failure(&self) -> u64 {
        let mut m = self.inner.lock().unwrap();
        m.health_check_failures += 1;
        m.health_check_failures
    }

    pub fn snapshot(&self, circuit: CircuitSnapshot) -> MetricsSnapshot {
        let m = self.inner.lock().unwrap();
        MetricsSnapshot {
            total_connections_created: m.total_connections_created,
            total_connections_closed: m.total_connections_closed,
            total_checkouts: m.total_checkouts,
            total_checkins: m.total_checkins,
            total_errors: m.total_errors,
            total_retries: m.total_retries,
            active_connections: m.active_connections,
            idle_connections: m.idle_connections,
            overflow_connections: m.overflow_connections,
            avg_checkout_time_ms: round2(m.avg_checkout_time_ms),
            max_checkout_time_ms: round2(m.max_checkout_time_ms),
            circuit_state: circuit.circuit_state,
            circuit_failures: circuit.circuit_failures,
            circuit_opened_at: circuit.circuit_opened_at,
            last_health_check: m.last_health_check,
            health_check_failures: m.health_check_failures,
        }
    }
}
