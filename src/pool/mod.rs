//! Connection pooling and circuit breaker module
//!
//! This module provides:
//! - A fixed-size pool with bounded overflow connections
//! - Age-based recycling and liveness validation on checkout
//! - A circuit breaker guarding connection creation
//! - Retry with exponential backoff for connection establishment
//! - Live usage metrics and direct health checks

pub mod circuit;
pub mod connection;
pub mod core;
pub mod error;
pub mod factory;
pub mod metrics;

pub use self::circuit::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use self::connection::{Connection, Connector, PooledConnection};
pub use self::core::{HealthReport, Pool, PoolStats, WorkFuture};
pub use self::error::{BoxError, PoolError};
pub use self::metrics::{MetricsRegistry, MetricsSnapshot};
