//! Connection proxies and the logical handles given to callers.
//!
//! A [`ConnectionProxy`] owns exactly one physical connection plus the
//! bookkeeping the pool needs (timestamps, fingerprint, validity). Whenever
//! the pool moves a connection between callers it builds a *new* proxy around
//! the same physical connection and invalidates the old one, so a stale
//! handle can never reach a connection that has been handed to someone else.
//!
//! ```text
//! CREATED → ACTIVE → (IDLE ⇄ ACTIVE)* → INVALIDATED
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tidepool_core::{ConnectionTypeCode, IsolationLevel};

use crate::connection::Connection;
use crate::error::ConnectionError;
use crate::pool::PoolShared;

/// Timestamps and fingerprint of a proxy.
///
/// Kept apart from the connection lock so the pool can read checkout times
/// while a caller is in the middle of a query.
#[derive(Clone, Copy, Debug)]
struct ProxyTimes {
    created_at: Instant,
    last_used_at: Instant,
    checkout_at: Instant,
    type_code: Option<ConnectionTypeCode>,
}

#[derive(Debug)]
pub(crate) struct ConnectionProxy {
    /// Identity of the wrapped physical connection; survives re-wrapping.
    real_id: u64,
    valid: AtomicBool,
    conn: Mutex<Option<Box<dyn Connection>>>,
    times: Mutex<ProxyTimes>,
}

impl ConnectionProxy {
    pub(crate) fn new(real_id: u64, conn: Box<dyn Connection>) -> Arc<Self> {
        let now = Instant::now();
        Arc::new(Self {
            real_id,
            valid: AtomicBool::new(true),
            conn: Mutex::new(Some(conn)),
            times: Mutex::new(ProxyTimes {
                created_at: now,
                last_used_at: now,
                checkout_at: now,
                type_code: None,
            }),
        })
    }

    pub(crate) fn real_id(&self) -> u64 {
        self.real_id
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }

    /// Move the physical connection into a fresh proxy, invalidating this one.
    ///
    /// The new proxy keeps `created_at` and `last_used_at`. Returns `None` if
    /// this proxy no longer holds a connection.
    pub(crate) fn rewrap(&self) -> Option<Arc<ConnectionProxy>> {
        let conn = self.invalidate()?;
        let times = *self.times.lock();
        Some(Arc::new(Self {
            real_id: self.real_id,
            valid: AtomicBool::new(true),
            conn: Mutex::new(Some(conn)),
            times: Mutex::new(ProxyTimes {
                type_code: None,
                ..times
            }),
        }))
    }

    /// Mark this proxy invalid and take the physical connection out of it.
    ///
    /// Waits for any operation in flight on the connection to finish.
    pub(crate) fn invalidate(&self) -> Option<Box<dyn Connection>> {
        let mut slot = self.conn.lock();
        self.valid.store(false, Ordering::SeqCst);
        slot.take()
    }

    /// Run `f` against the physical connection, failing if the proxy was invalidated.
    pub(crate) fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> Result<R, ConnectionError>,
    ) -> Result<R, ConnectionError> {
        let mut slot = self.conn.lock();
        match slot.as_mut() {
            Some(conn) if self.is_valid() => f(conn.as_mut()),
            _ => Err(ConnectionError::Invalidated {
                real_id: self.real_id,
            }),
        }
    }

    pub(crate) fn stamp_checkout(&self, type_code: ConnectionTypeCode) {
        let now = Instant::now();
        let mut times = self.times.lock();
        times.checkout_at = now;
        times.last_used_at = now;
        times.type_code = Some(type_code);
    }

    pub(crate) fn touch(&self) {
        self.times.lock().last_used_at = Instant::now();
    }

    pub(crate) fn type_code(&self) -> Option<ConnectionTypeCode> {
        self.times.lock().type_code
    }

    pub(crate) fn checkout_time(&self) -> Duration {
        self.times.lock().checkout_at.elapsed()
    }

    pub(crate) fn time_since_last_use(&self) -> Duration {
        self.times.lock().last_used_at.elapsed()
    }

    pub(crate) fn age(&self) -> Duration {
        self.times.lock().created_at.elapsed()
    }
}

// ── LogicalConnection ───────────────────────────────────────────────

/// A connection checked out of a [`ConnectionPool`](crate::ConnectionPool).
///
/// Behaves like the physical connection it wraps, except that `close`
/// returns it to the pool. Dropping the handle without closing it has the
/// same effect. Once the pool has invalidated the handle (overdue reclaim,
/// `force_close_all`, reconfiguration), every operation fails with
/// [`ConnectionError::Invalidated`].
pub struct LogicalConnection {
    proxy: Arc<ConnectionProxy>,
    pool: Arc<PoolShared>,
    released: bool,
}

impl LogicalConnection {
    pub(crate) fn new(proxy: Arc<ConnectionProxy>, pool: Arc<PoolShared>) -> Self {
        Self {
            proxy,
            pool,
            released: false,
        }
    }

    /// Identity of the underlying physical connection.
    ///
    /// Two handles report the same id only if they wrapped the same physical
    /// connection at different times.
    pub fn real_id(&self) -> u64 {
        self.proxy.real_id()
    }

    /// Whether the pool still considers this handle usable.
    pub fn is_valid(&self) -> bool {
        !self.released && self.proxy.is_valid()
    }

    /// How long this handle has been checked out.
    pub fn checkout_time(&self) -> Duration {
        self.proxy.checkout_time()
    }

    /// How long ago the wrapped physical connection was opened.
    pub fn age(&self) -> Duration {
        self.proxy.age()
    }

    /// Run `f` directly against the physical connection.
    ///
    /// Calling back into the pool from inside `f` can deadlock.
    pub fn unwrap_physical<R>(
        &mut self,
        f: impl FnOnce(&mut dyn Connection) -> R,
    ) -> Result<R, ConnectionError> {
        self.with_conn(|conn| Ok(f(conn)))
    }

    fn with_conn<R>(
        &self,
        f: impl FnOnce(&mut dyn Connection) -> Result<R, ConnectionError>,
    ) -> Result<R, ConnectionError> {
        if self.released {
            return Err(ConnectionError::Invalidated {
                real_id: self.proxy.real_id(),
            });
        }
        let result = self.proxy.with_conn(f);
        self.proxy.touch();
        result
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release(&self.proxy);
        }
    }
}

impl Connection for LogicalConnection {
    fn is_closed(&self) -> Result<bool, ConnectionError> {
        if self.released {
            return Ok(true);
        }
        self.with_conn(|conn| conn.is_closed())
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        self.with_conn(|conn| conn.auto_commit())
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError> {
        self.with_conn(|conn| conn.set_auto_commit(auto_commit))
    }

    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.with_conn(|conn| conn.set_transaction_isolation(level))
    }

    fn set_network_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.with_conn(|conn| conn.set_network_timeout(timeout))
    }

    fn execute(&mut self, sql: &str) -> Result<u64, ConnectionError> {
        self.with_conn(|conn| conn.execute(sql))
    }

    fn probe(&mut self, query: &str) -> Result<(), ConnectionError> {
        self.with_conn(|conn| conn.probe(query))
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.with_conn(|conn| conn.commit())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.with_conn(|conn| conn.rollback())
    }

    /// Return the connection to the pool. Closing twice is a no-op.
    fn close(&mut self) -> Result<(), ConnectionError> {
        self.release();
        Ok(())
    }
}

impl Drop for LogicalConnection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for LogicalConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalConnection")
            .field("real_id", &self.proxy.real_id())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}
