//! Connection-scoped units of work against MySQL.
//!
//! Every unit of work opens its own connection, runs inside one transaction,
//! and releases the connection whatever the outcome. Nothing is pooled or
//! shared between callers.

use crate::config::DatabaseConfig;
use crate::error::{Error, Result, Store};
use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, MySql, Transaction};
use std::time::Duration;
use tracing::{debug, warn};

/// Immutable connection settings plus the scoped-transaction helper
#[derive(Debug, Clone)]
pub struct Database {
    options: MySqlConnectOptions,
    connect_timeout: Duration,
}

impl Database {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name);

        Self {
            options,
            connect_timeout: config.connect_timeout(),
        }
    }

    /// Open a fresh connection, bounded by the connect timeout.
    pub async fn connect(&self) -> Result<MySqlConnection> {
        match tokio::time::timeout(self.connect_timeout, self.options.connect()).await {
            Ok(conn) => conn.map_err(Error::from_sqlx),
            Err(_) => Err(Error::Transient {
                store: Store::Database,
                message: format!(
                    "connection not established within {}s",
                    self.connect_timeout.as_secs()
                ),
            }),
        }
    }

    /// Run `work` inside a transaction on a dedicated connection.
    ///
    /// Commits when `work` succeeds. On failure the transaction is rolled
    /// back and the original error returned; a failed rollback is only
    /// logged. The connection is closed on every path.
    pub async fn scoped<T, F>(&self, unit: &'static str, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut MySqlConnection) -> BoxFuture<'c, Result<T>> + Send,
    {
        let mut conn = self.connect().await?;

        let outcome = match conn.begin().await.map_err(Error::from_sqlx) {
            Ok(mut tx) => {
                let outcome = work(&mut *tx).await;
                settle(unit, tx, outcome).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = conn.close().await {
            debug!(unit, error = %e, "Connection close failed");
        }

        outcome
    }
}

/// End of an open transaction
#[async_trait]
trait Settle: Send {
    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}

#[async_trait]
impl<'c> Settle for Transaction<'c, MySql> {
    async fn commit(self) -> Result<()> {
        Transaction::commit(self).await.map_err(Error::from_sqlx)
    }

    async fn rollback(self) -> Result<()> {
        Transaction::rollback(self).await.map_err(Error::from_sqlx)
    }
}

/// Commit on success; otherwise roll back and keep the work's error
async fn settle<T, X: Settle>(unit: &'static str, tx: X, outcome: Result<T>) -> Result<T> {
    match outcome {
        Ok(value) => tx.commit().await.map(|_| value),
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(unit, error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}
