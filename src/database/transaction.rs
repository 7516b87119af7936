//! # Transaction Scope
//!
//! Nested transactional execution carried by a tokio task-local.
//!
//! The outermost [`Database::transaction`] call begins a transaction, publishes it to the
//! current task for the duration of the scope, and commits on `Ok` or rolls back on `Err`.
//! Nested calls on the same task reuse the active transaction as long as they request the
//! same isolation level. The task-local is restored on every exit path, including panics
//! and cancellation, because it lives only as long as the scoped future.

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::connection::Database;
use super::errors::DatabaseError;

/// Transaction isolation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    fn set_statement(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            IsolationLevel::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            IsolationLevel::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "read_committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable_read" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(format!("unknown isolation level: {other}")),
        }
    }
}

/// The transaction published to the current task
pub struct TransactionContext {
    isolation: IsolationLevel,
    pub(crate) connection: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl TransactionContext {
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("isolation", &self.isolation)
            .finish()
    }
}

tokio::task_local! {
    static CURRENT_TRANSACTION: Arc<TransactionContext>;
}

/// The transaction active on the current task, if any
pub fn current_transaction() -> Option<Arc<TransactionContext>> {
    CURRENT_TRANSACTION.try_with(Arc::clone).ok()
}

impl Database {
    /// Run `f` inside a transaction at `isolation`.
    ///
    /// Reuses the active transaction when called inside another scope; fails with
    /// [`DatabaseError::IsolationMismatch`] when the isolation levels differ.
    pub async fn transaction<F, Fut, T>(&self, isolation: IsolationLevel, f: F) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        if let Some(active) = current_transaction() {
            if active.isolation != isolation {
                return Err(DatabaseError::IsolationMismatch {
                    active: active.isolation,
                    requested: isolation,
                }
                .into());
            }
            return f().await;
        }

        let mut tx = self.pool().begin().await.map_err(DatabaseError::from)?;
        sqlx::query(isolation.set_statement())
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from)?;

        debug!(isolation = %isolation, "Transaction started");

        let context = Arc::new(TransactionContext {
            isolation,
            connection: Mutex::new(Some(tx)),
        });

        let result = CURRENT_TRANSACTION
            .scope(Arc::clone(&context), async move { f().await })
            .await;

        let Some(tx) = context.connection.lock().await.take() else {
            return result;
        };

        match result {
            Ok(value) => {
                tx.commit().await.map_err(DatabaseError::from)?;
                debug!(isolation = %isolation, "Transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Transaction rollback failed");
                } else {
                    debug!(isolation = %isolation, error = %err, "Transaction rolled back");
                }
                Err(err)
            }
        }
    }
}
