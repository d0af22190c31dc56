//! Pool and connection error types.

use thiserror::Error;

/// Errors reported by a physical connection, or by a pooled handle whose
/// connection has been taken away from it.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection is closed")]
    Closed,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("connection {real_id} has been invalidated and can no longer be used")]
    Invalidated { real_id: u64 },
}

/// Errors surfaced by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open connection to {url}: {source}")]
    ConnectFailure {
        url: String,
        #[source]
        source: ConnectionError,
    },

    #[error("bad connection {real_id}: {reason}")]
    BadConnection { real_id: u64, reason: String },

    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("wait for a pooled connection was interrupted")]
    WaitInterrupted,

    #[error("connection pool is closed")]
    Closed,
}

pub type PoolResult<T> = Result<T, PoolError>;
