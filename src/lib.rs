//! dbpool - MySQL connection pool with bounded overflow, age-based
//! recycling, a circuit breaker and live metrics

pub mod config;
pub mod mysql;
pub mod pool;

pub use config::PoolConfig;
pub use pool::{HealthReport, Pool, PoolError, PoolStats};
