use std::time::Duration;

/// Boxed error type carried across the connector seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error types for pool operations
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The circuit breaker rejected the checkout before any connection
    /// attempt was made.
    #[error("circuit breaker is open, database appears to be down; retry in {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    /// The bounded wait for a checkin expired with overflow exhausted.
    #[error("connection pool exhausted; no connection became available within {waited:?}")]
    Exhausted { waited: Duration },

    /// Connection creation failed after all retry attempts.
    #[error("failed to establish connection after {attempts} attempts")]
    Create {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// The caller's unit of work (or its commit) failed. The underlying
    /// error is carried unchanged.
    #[error("unit of work failed")]
    Work(#[source] BoxError),
}
