//! Connection capability surface and the factory that opens physical connections.

use std::collections::HashMap;
use std::time::Duration;

use tidepool_core::IsolationLevel;

use crate::error::ConnectionError;

/// Operations the SQL execution layer performs on a database connection.
///
/// Implemented by driver connections (the physical side) and by
/// [`LogicalConnection`](crate::LogicalConnection), whose `close` hands the
/// connection back to the pool instead of closing it.
pub trait Connection: Send + std::fmt::Debug {
    /// Whether the connection has already reported itself closed.
    fn is_closed(&self) -> Result<bool, ConnectionError>;
    fn auto_commit(&self) -> Result<bool, ConnectionError>;
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError>;
    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), ConnectionError>;

    /// Apply a network timeout. Drivers without one can ignore it.
    fn set_network_timeout(&mut self, _timeout: Duration) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Execute a statement, returning the affected row count.
    fn execute(&mut self, sql: &str) -> Result<u64, ConnectionError>;
    /// Run a no-op liveness query, discarding any result.
    fn probe(&mut self, query: &str) -> Result<(), ConnectionError>;
    fn commit(&mut self) -> Result<(), ConnectionError>;
    fn rollback(&mut self) -> Result<(), ConnectionError>;
    fn close(&mut self) -> Result<(), ConnectionError>;
}

/// Opens physical connections. Injected into the pool so tests can supply mocks.
pub trait ConnectionFactory: Send + Sync {
    fn open(
        &self,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        properties: &HashMap<String, String>,
    ) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// Roll back any open transaction unless the connection is in auto-commit mode.
pub(crate) fn rollback_if_needed(conn: &mut dyn Connection) -> Result<(), ConnectionError> {
    if !conn.auto_commit()? {
        conn.rollback()?;
    }
    Ok(())
}

/// Best-effort rollback followed by a physical close.
///
/// Both steps always run; the first error seen is returned for logging.
pub(crate) fn shut_down(conn: &mut dyn Connection) -> Result<(), ConnectionError> {
    let rolled_back = rollback_if_needed(conn);
    let closed = conn.close();
    rolled_back.and(closed)
}
