//! MySQL backend for the pool, built on raw sqlx connections.
//!
//! The pool manages transaction boundaries itself, so sessions are opened
//! with autocommit disabled and commit/rollback are issued explicitly.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{Connection as SqlxConnection, Executor};

use crate::config::PoolConfig;
use crate::pool::{BoxError, Connection, Connector};

/// Builds raw MySQL connections from pool configuration.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    options: MySqlConnectOptions,
}

impl MySqlConnector {
    pub fn new(config: &PoolConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .charset("utf8mb4");
        Self { options }
    }
}

#[async_trait]
impl Connector for MySqlConnector {
    type Conn = MySqlSession;

    async fn connect(&self, timeout: Duration) -> Result<Self::Conn, BoxError> {
        let mut conn = tokio::time::timeout(timeout, MySqlConnection::connect_with(&self.options))
            .await
            .map_err(|_| BoxError::from("connection timeout"))??;

        // The pool owns transaction boundaries; autocommit would defeat them.
        conn.execute("SET autocommit = 0").await?;

        Ok(MySqlSession { conn })
    }
}

/// One live MySQL session owned by the pool.
#[derive(Debug)]
pub struct MySqlSession {
    conn: MySqlConnection,
}

impl MySqlSession {
    /// The underlying sqlx connection, for running queries directly.
    pub fn as_inner_mut(&mut self) -> &mut MySqlConnection {
        &mut self.conn
    }
}

#[async_trait]
impl Connection for MySqlSession {
    async fn ping(&mut self) -> Result<(), BoxError> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BoxError> {
        self.conn.execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BoxError> {
        self.conn.execute("ROLLBACK").await?;
        Ok(())
    }

    async fn health_query(&mut self) -> Result<(), BoxError> {
        self.conn.execute("SELECT 1").await?;
        Ok(())
    }

    async fn close(self) -> Result<(), BoxError> {
        self.conn.close().await?;
        Ok(())
    }
}
