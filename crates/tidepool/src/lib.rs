//! tidepool — a bounded, blocking pool of physical database connections.
//!
//! Callers check connections out with [`ConnectionPool::acquire`] and hand
//! them back by closing (or dropping) the returned [`LogicalConnection`].
//! The pool reuses idle connections oldest-first, opens new ones up to
//! `max_active`, reclaims connections held past `max_checkout_time`, and
//! pings idle connections before reuse when configured to.
//!
//! # Architecture
//!
//! ```text
//! ConnectionPool
//!   ├── acquire() → idle queue / DataSource::open / overdue reclaim / wait
//!   │     └── Validator::check() before the connection is handed out
//!   ├── LogicalConnection::close() → release() → idle queue or physical close
//!   ├── force_close_all() ← every configuration setter
//!   └── statistics() → PoolStatistics snapshot
//! ```

pub mod config;
pub mod connection;
pub mod datasource;
pub mod error;
pub mod pool;
mod proxy;
mod state;
mod validator;

#[cfg(test)]
mod mock;

pub use config::PoolConfig;
pub use connection::{Connection, ConnectionFactory};
pub use datasource::DataSource;
pub use error::{ConnectionError, PoolError, PoolResult};
pub use pool::ConnectionPool;
pub use proxy::LogicalConnection;
pub use state::PoolStatistics;
pub use tidepool_core::{ConnectionTypeCode, IsolationLevel};
