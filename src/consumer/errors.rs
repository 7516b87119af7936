use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Worker pool {pool} is shut down")]
    PoolClosed { pool: String },
}

impl ConsumerError {
    pub fn pool_closed(pool: impl Into<String>) -> Self {
        Self::PoolClosed { pool: pool.into() }
    }
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
