//! The connector seam: traits the pool manages connections through, and the
//! wrapper that carries per-connection identity and age.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::error::BoxError;

/// One live database session, as seen by the pool.
///
/// The pool drives transaction boundaries itself: it commits after a
/// successful unit of work and rolls back on failure and on every checkin.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Protocol-level liveness probe. Must not attempt to reconnect.
    async fn ping(&mut self) -> Result<(), BoxError>;

    /// Commit the current transaction.
    async fn commit(&mut self) -> Result<(), BoxError>;

    /// Roll back the current transaction. Idempotent when nothing is pending.
    async fn rollback(&mut self) -> Result<(), BoxError>;

    /// Trivial round-trip query used by health checks.
    async fn health_query(&mut self) -> Result<(), BoxError>;

    /// Close the session gracefully.
    async fn close(self) -> Result<(), BoxError>;
}

/// Creates raw connections for the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: Connection;

    /// Establish one live connection, bounded by `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<Self::Conn, BoxError>;
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A pooled connection: the raw session plus its creation timestamp and a
/// stable identity token. Ownership is exclusive; the pool holds it while
/// idle and exactly one caller holds it per checkout.
pub struct PooledConnection<C: Connection> {
    conn: C,
    created_at: Instant,
    id: u64,
}

impl<C: Connection> PooledConnection<C> {
    pub(crate) fn new(conn: C) -> Self {
        Self {
            conn,
            created_at: Instant::now(),
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Stable identity token, unique for the life of the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Time since the underlying session was established.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the connection has outlived `max_age` and should be recycled.
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.age() > max_age
    }

    pub(crate) fn raw_mut(&mut self) -> &mut C {
        &mut self.conn
    }

    pub(crate) fn into_raw(self) -> C {
        self.conn
    }
}
