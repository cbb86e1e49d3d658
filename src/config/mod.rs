use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Connection parameters and pool tunables. Pure data; construct once and
/// hand to [`Pool::connect`](crate::pool::Pool::connect).
#[derive(Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Database host or IP address
    pub host: String,

    /// Database port (typically 3306)
    pub port: u16,

    /// Database user name
    pub user: String,

    /// Password for authentication
    pub password: String,

    /// Default database/schema to use
    pub database: String,

    /// Maximum number of idle pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Additional temporary connections allowed when the pool is empty
    #[serde(default = "default_max_overflow")]
    pub max_overflow: usize,

    /// Maximum connection age in seconds before recycling
    #[serde(default = "default_pool_recycle")]
    pub pool_recycle: u64,

    /// Timeout in seconds for establishing a new connection
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Bounded wait in seconds for a checkin once overflow is exhausted
    #[serde(default = "default_checkout_timeout")]
    pub checkout_timeout: u64,

    /// Maximum retry attempts for failed connection creations
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Consecutive creation failures before the circuit opens
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Seconds before an open circuit attempts half-open recovery
    #[serde(default = "default_circuit_timeout")]
    pub circuit_timeout: u64,

    /// Advisory interval in seconds for external health-check polling.
    /// Stored for consumers; the pool itself does not spawn a checker.
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,
}

fn default_pool_size() -> usize {
    10
}

fn default_max_overflow() -> usize {
    5
}

fn default_pool_recycle() -> u64 {
    3600
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_checkout_timeout() -> u64 {
    10
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_timeout() -> u64 {
    60
}

fn default_health_check_interval() -> u64 {
    60
}

impl PoolConfig {
    pub fn recycle_after(&self) -> Duration {
        Duration::from_secs(self.pool_recycle)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn checkout_wait(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout)
    }

    pub fn circuit_recovery_after(&self) -> Duration {
        Duration::from_secs(self.circuit_timeout)
    }

    /// Load configuration from environment variables with the given prefix
    /// (e.g. `DBPOOL` reads `DBPOOL_HOST`, `DBPOOL_PORT`, ...). A `.env`
    /// file is honoured if present. Connection fields are required;
    /// tunables fall back to their defaults.
    pub fn from_env(prefix: &str) -> Result<Self> {
        // Try to load .env if it exists (don't fail if it doesn't)
        let _ = dotenvy::dotenv();

        let var = |name: &str| std::env::var(format!("{prefix}_{name}"));

        let host = var("HOST").with_context(|| format!("{prefix}_HOST not set"))?;
        let port: u16 = var("PORT")
            .with_context(|| format!("{prefix}_PORT not set"))?
            .parse()
            .with_context(|| format!("{prefix}_PORT is not a valid port"))?;
        let user = var("USER").with_context(|| format!("{prefix}_USER not set"))?;
        let password = var("PASSWORD").with_context(|| format!("{prefix}_PASSWORD not set"))?;
        let database = var("DATABASE").with_context(|| format!("{prefix}_DATABASE not set"))?;

        let mut config = Self {
            host,
            port,
            user,
            password,
            database,
            pool_size: default_pool_size(),
            max_overflow: default_max_overflow(),
            pool_recycle: default_pool_recycle(),
            connection_timeout: default_connection_timeout(),
            checkout_timeout: default_checkout_timeout(),
            max_retry_attempts: default_max_retry_attempts(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_timeout: default_circuit_timeout(),
            health_check_interval: default_health_check_interval(),
        };

        macro_rules! tunable {
            ($field:ident, $name:literal) => {
                if let Ok(value) = var($name) {
                    config.$field = value
                        .parse()
                        .with_context(|| format!("{prefix}_{} is not a valid number", $name))?;
                }
            };
        }

        tunable!(pool_size, "POOL_SIZE");
        tunable!(max_overflow, "MAX_OVERFLOW");
        tunable!(pool_recycle, "POOL_RECYCLE");
        tunable!(connection_timeout, "CONNECTION_TIMEOUT");
        tunable!(checkout_timeout, "CHECKOUT_TIMEOUT");
        tunable!(max_retry_attempts, "MAX_RETRY_ATTEMPTS");
        tunable!(circuit_failure_threshold, "CIRCUIT_FAILURE_THRESHOLD");
        tunable!(circuit_timeout, "CIRCUIT_TIMEOUT");
        tunable!(health_check_interval, "HEALTH_CHECK_INTERVAL");

        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {:?}", path.as_ref()))?;

        let config: Self =
            serde_yaml::from_str(&content).context("failed to parse YAML configuration")?;

        Ok(config)
    }

    /// Load from a YAML file when a path is given, otherwise from `DBPOOL_*`
    /// environment variables.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        match config_path {
            Some(path) => Self::from_yaml(path),
            None => Self::from_env("DBPOOL"),
        }
    }

    /// Small, fast preset for tests: tiny pool, one retry attempt, short
    /// circuit and checkout windows.
    pub fn for_testing() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: "dbpool".to_string(),
            password: String::new(),
            database: "dbpool_test".to_string(),
            pool_size: 2,
            max_overflow: 1,
            pool_recycle: 3600,
            connection_timeout: 2,
            checkout_timeout: 1,
            max_retry_attempts: 1,
            circuit_failure_threshold: 3,
            circuit_timeout: 1,
            health_check_interval: 60,
        }
    }
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("pool_size", &self.pool_size)
            .field("max_overflow", &self.max_overflow)
            .field("pool_recycle", &self.pool_recycle)
            .field("connection_timeout", &self.connection_timeout)
            .field("checkout_timeout", &self.checkout_timeout)
            .field("max_retry_attempts", &self.max_retry_attempts)
            .field("circuit_failure_threshold", &self.circuit_failure_threshold)
            .field("circuit_timeout", &self.circuit_timeout)
            .field("health_check_interval", &self.health_check_interval)
            .finish()
    }
}
