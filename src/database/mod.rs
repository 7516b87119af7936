//! # Database Module
//!
//! PostgreSQL access for the idempotency store and for handlers:
//!
//! - [`Database`]: pool-backed handle whose query helpers join the current transaction
//! - [`Database::transaction`]: nested transaction scope with isolation checking
//! - [`Database::lock`] / [`Database::xact_lock`]: named advisory locks

pub mod advisory_lock;
pub mod connection;
pub mod errors;
pub mod transaction;

pub use advisory_lock::AdvisoryLock;
pub use connection::Database;
pub use errors::{DatabaseError, DatabaseResult};
pub use transaction::{current_transaction, IsolationLevel, TransactionContext};
