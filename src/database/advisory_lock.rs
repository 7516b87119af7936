//! # Advisory Locks
//!
//! Named mutual exclusion backed by PostgreSQL advisory locks.
//!
//! Names are mapped to 64-bit keys with `hashtextextended(name, 0)` on the server, the
//! same way every process computes them. Distinct names that collide under the hash
//! serialize against each other.
//!
//! - [`Database::lock`]: session lock held on a dedicated pooled connection until
//!   [`AdvisoryLock::release`]
//! - [`Database::xact_lock`]: transaction lock released automatically at commit or rollback

use std::future::Future;
use std::time::Duration;

use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::connection::Database;
use super::errors::{DatabaseError, DatabaseResult};
use super::transaction::current_transaction;
use crate::constants::ADVISORY_LOCK_POLL_INTERVAL;

/// A held session-level advisory lock
///
/// Dropping the guard without calling [`release`](AdvisoryLock::release) closes its
/// connection instead of returning it to the pool, which makes the server drop the lock.
#[derive(Debug)]
pub struct AdvisoryLock {
    name: String,
    key: i64,
    connection: Option<PoolConnection<Postgres>>,
}

impl AdvisoryLock {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> i64 {
        self.key
    }

    /// Unlock and return the connection to the pool
    pub async fn release(mut self) -> DatabaseResult<()> {
        if let Some(mut connection) = self.connection.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(self.key)
                .execute(&mut *connection)
                .await?;
            debug!(lock = %self.name, key = self.key, "Advisory lock released");
        }
        Ok(())
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            warn!(
                lock = %self.name,
                key = self.key,
                "Advisory lock dropped without release, closing its connection"
            );
            drop(connection.detach());
        }
    }
}

impl Database {
    /// Block until the session-level advisory lock `name` is held
    pub async fn lock(&self, name: &str) -> DatabaseResult<AdvisoryLock> {
        let mut connection = self.pool().acquire().await?;

        let key: i64 = sqlx::query_scalar("SELECT hashtextextended($1, 0)")
            .bind(name)
            .fetch_one(&mut *connection)
            .await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *connection)
            .await?;

        debug!(lock = %name, key, "Advisory lock acquired");

        Ok(AdvisoryLock {
            name: name.to_string(),
            key,
            connection: Some(connection),
        })
    }

    /// Run `f` while holding the session-level advisory lock `name`
    pub async fn with_lock<F, Fut, T>(&self, name: &str, f: F) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        let lock = self.lock(name).await?;
        let result = f().await;
        lock.release().await?;
        result
    }

    /// Acquire the transaction-level advisory lock `name`.
    ///
    /// Requires an active [`Database::transaction`] scope. Without a timeout this waits
    /// until the lock is granted and returns `true`; with a timeout it returns `false`
    /// once the timeout elapses without the lock.
    pub async fn xact_lock(&self, name: &str, timeout: Option<Duration>) -> DatabaseResult<bool> {
        if current_transaction().is_none() {
            return Err(DatabaseError::TransactionNotExists);
        }

        let Some(timeout) = timeout else {
            self.execute(
                sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))").bind(name),
            )
            .await?;
            debug!(lock = %name, "Transaction advisory lock acquired");
            return Ok(true);
        };

        let deadline = Instant::now() + timeout;
        loop {
            let acquired: bool = self
                .fetch_scalar(
                    sqlx::query_scalar("SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0))")
                        .bind(name),
                )
                .await?;

            if acquired {
                debug!(lock = %name, "Transaction advisory lock acquired");
                return Ok(true);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!(lock = %name, timeout_ms = timeout.as_millis() as u64, "Transaction advisory lock timed out");
                return Ok(false);
            }
            tokio::time::sleep(ADVISORY_LOCK_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}
