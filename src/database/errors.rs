//! # Database Error Types

use thiserror::Error;

use super::transaction::IsolationLevel;

#[derive(Error, Debug)]
pub enum DatabaseError {
    /// A nested transaction asked for a different isolation than the active one
    #[error("Transaction isolation mismatch: active {active}, requested {requested}")]
    IsolationMismatch {
        active: IsolationLevel,
        requested: IsolationLevel,
    },

    /// An operation that needs an active transaction ran outside one
    #[error("Transaction does not exist in the current context")]
    TransactionNotExists,

    #[error("Database query failed: {0}")]
    Query(#[from] sqlx::Error),
}

pub type DatabaseResult<T> = Result<T, DatabaseError>;
