//! Connection pool orchestrator.
//!
//! All bookkeeping lives in one [`PoolInner`] behind a single mutex, with a
//! condition variable for callers waiting on a returned connection.
//!
//! ```text
//! acquire(user, password)
//!   → idle queue non-empty        → pop oldest idle
//!   → active < max_active         → open new physical connection
//!   → oldest active is overdue    → roll back, re-wrap, reclaim it
//!   → otherwise                   → wait up to time_to_wait, retry
//!   → validate candidate          → bad? count it, retry (bounded)
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tidepool_core::{ConnectionTypeCode, IsolationLevel, PoolFileConfig};
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connection::{ConnectionFactory, rollback_if_needed, shut_down};
use crate::datasource::DataSource;
use crate::error::{PoolError, PoolResult};
use crate::proxy::{ConnectionProxy, LogicalConnection};
use crate::state::{PoolState, PoolStatistics};
use crate::validator::Validator;

/// Everything guarded by the pool lock.
#[derive(Debug)]
struct PoolInner {
    datasource: DataSource,
    config: PoolConfig,
    /// Fingerprint of the current default credentials; connections carrying
    /// any other code are closed on return instead of pooled.
    expected_type_code: ConnectionTypeCode,
    state: PoolState,
    next_real_id: u64,
    closed: bool,
}

/// Outcome of one pass over the checkout sources.
enum Candidate {
    Ready(Arc<ConnectionProxy>),
    MustWait,
}

impl PoolInner {
    fn new(datasource: DataSource, config: PoolConfig) -> Self {
        Self {
            expected_type_code: datasource.type_code(),
            datasource,
            config,
            state: PoolState::default(),
            next_real_id: 0,
            closed: false,
        }
    }

    fn next_candidate(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> PoolResult<Candidate> {
        if let Some(proxy) = self.state.idle.pop_front() {
            debug!(real_id = proxy.real_id(), "checked out connection from pool");
            return Ok(Candidate::Ready(proxy));
        }

        if self.state.active.len() < self.config.max_active {
            let conn = self.datasource.open(username, password).map_err(|source| {
                PoolError::ConnectFailure {
                    url: self.datasource.url.clone(),
                    source,
                }
            })?;
            self.next_real_id += 1;
            let proxy = ConnectionProxy::new(self.next_real_id, conn);
            debug!(
                real_id = proxy.real_id(),
                active = self.state.active.len(),
                "created connection"
            );
            return Ok(Candidate::Ready(proxy));
        }

        let Some(oldest) = self.state.active.front().cloned() else {
            return Err(PoolError::PoolExhausted(format!(
                "no capacity to hand out a connection (max_active = {})",
                self.config.max_active
            )));
        };

        let checkout_time = oldest.checkout_time();
        if checkout_time <= self.config.max_checkout_time {
            return Ok(Candidate::MustWait);
        }

        self.state.active.pop_front();
        let counters = &mut self.state.counters;
        counters.claimed_overdue_connection_count += 1;
        counters.accumulated_checkout_time_of_overdue_connections += checkout_time;
        counters.accumulated_checkout_time += checkout_time;

        let real_id = oldest.real_id();
        if let Err(err) = oldest.with_conn(|conn| rollback_if_needed(conn)) {
            // Validation of the re-wrapped proxy decides whether it is still usable.
            debug!(real_id, error = %err, "bad connection, could not roll back");
        }

        match oldest.rewrap() {
            Some(proxy) => {
                debug!(
                    real_id,
                    checkout_ms = checkout_time.as_millis() as u64,
                    "claimed overdue connection"
                );
                Ok(Candidate::Ready(proxy))
            }
            None => Err(PoolError::PoolExhausted(format!(
                "active connection {real_id} had no physical connection to reclaim"
            ))),
        }
    }

    /// Validate `candidate` and move it into the active list.
    fn activate(
        &mut self,
        candidate: Arc<ConnectionProxy>,
        username: Option<&str>,
        password: Option<&str>,
        started: Instant,
    ) -> PoolResult<Arc<ConnectionProxy>> {
        let real_id = candidate.real_id();
        let checked = Validator::new(&self.config).check(&candidate).and_then(|()| {
            candidate
                .with_conn(|conn| rollback_if_needed(conn))
                .map_err(|err| {
                    discard(&candidate);
                    PoolError::BadConnection {
                        real_id,
                        reason: err.to_string(),
                    }
                })
        });

        if let Err(err) = checked {
            self.state.counters.bad_connection_count += 1;
            debug!(
                real_id,
                error = %err,
                "a bad connection was returned from the pool, getting another connection"
            );
            return Err(err);
        }

        candidate.stamp_checkout(self.datasource.type_code_for(username, password));
        self.state.active.push_back(Arc::clone(&candidate));
        let counters = &mut self.state.counters;
        counters.request_count += 1;
        counters.accumulated_request_time += started.elapsed();
        Ok(candidate)
    }

    fn release(&mut self, proxy: &Arc<ConnectionProxy>) {
        self.state.remove_active(proxy);
        let real_id = proxy.real_id();

        if !proxy.is_valid() || Validator::new(&self.config).check(proxy).is_err() {
            self.state.counters.bad_connection_count += 1;
            debug!(
                real_id,
                "a bad connection attempted to return to the pool, discarding connection"
            );
            return;
        }

        self.state.counters.accumulated_checkout_time += proxy.checkout_time();

        let reusable = self.state.idle.len() < self.config.max_idle
            && proxy.type_code() == Some(self.expected_type_code);
        if reusable {
            match proxy.with_conn(|conn| rollback_if_needed(conn)) {
                Ok(()) => {
                    if let Some(fresh) = proxy.rewrap() {
                        self.state.idle.push_back(fresh);
                        debug!(
                            real_id,
                            idle = self.state.idle.len(),
                            "returned connection to pool"
                        );
                        return;
                    }
                }
                Err(err) => {
                    warn!(real_id, error = %err, "rollback on return failed, closing connection");
                }
            }
        }

        if let Some(mut conn) = proxy.invalidate() {
            if let Err(err) = shut_down(conn.as_mut()) {
                warn!(real_id, error = %err, "error while closing returned connection");
            }
        }
        debug!(real_id, "closed connection");
    }

    fn force_close_all(&mut self) {
        self.expected_type_code = self.datasource.type_code();
        let active = self.state.active.len();
        let idle = self.state.idle.len();

        for proxy in self.state.active.drain(..).chain(self.state.idle.drain(..)) {
            if let Some(mut conn) = proxy.invalidate() {
                if let Err(err) = shut_down(conn.as_mut()) {
                    warn!(
                        real_id = proxy.real_id(),
                        error = %err,
                        "error while force-closing connection"
                    );
                }
            }
        }

        info!(active, idle, "forcefully closed/removed all connections");
    }
}

/// Invalidate a proxy and close its connection. Close errors are logged.
fn discard(proxy: &ConnectionProxy) {
    if let Some(mut conn) = proxy.invalidate() {
        if let Err(err) = conn.close() {
            warn!(
                real_id = proxy.real_id(),
                error = %err,
                "error while closing discarded connection"
            );
        }
    }
}

/// Pool internals shared by the pool handle and every checked-out connection.
pub(crate) struct PoolShared {
    inner: Mutex<PoolInner>,
    /// Signalled whenever a connection leaves the active list.
    available: Condvar,
}

impl PoolShared {
    pub(crate) fn release(&self, proxy: &Arc<ConnectionProxy>) {
        self.inner.lock().release(proxy);
        self.available.notify_one();
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.state.idle.is_empty() || !inner.state.active.is_empty() {
            inner.force_close_all();
        }
    }
}

// ── ConnectionPool ──────────────────────────────────────────────────

/// A bounded, blocking pool of physical database connections.
///
/// Cloning the pool is cheap; clones share the same connections. When the
/// last clone and the last checked-out connection are gone, every pooled
/// connection is closed.
///
/// Acquisition has no overall deadline: a caller waits in slices of
/// `time_to_wait` until a connection is returned, an overdue one can be
/// reclaimed, or the bad connection tolerance is exceeded.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    pub fn new(datasource: DataSource, config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner::new(datasource, config)),
                available: Condvar::new(),
            }),
        }
    }

    /// Build a pool from a parsed `tidepool.toml`.
    pub fn from_file_config(config: &PoolFileConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let datasource = DataSource::from_section(&config.datasource, factory);
        let pool_config = config
            .pool
            .as_ref()
            .map(PoolConfig::from_section)
            .unwrap_or_default();
        Self::new(datasource, pool_config)
    }

    /// Check out a connection for the given credentials.
    ///
    /// Blocks while the pool is at `max_active` and no checked-out connection
    /// is overdue.
    pub fn acquire(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> PoolResult<LogicalConnection> {
        let started = Instant::now();
        let mut counted_wait = false;
        let mut local_bad_connections = 0usize;
        let mut inner = self.shared.inner.lock();

        loop {
            if inner.closed {
                return Err(if counted_wait {
                    PoolError::WaitInterrupted
                } else {
                    PoolError::Closed
                });
            }

            let candidate = match inner.next_candidate(username, password)? {
                Candidate::Ready(proxy) => proxy,
                Candidate::MustWait => {
                    if !counted_wait {
                        inner.state.counters.had_to_wait_count += 1;
                        counted_wait = true;
                    }
                    let time_to_wait = inner.config.time_to_wait;
                    debug!(
                        wait_ms = time_to_wait.as_millis() as u64,
                        "waiting for connection"
                    );
                    let wait_started = Instant::now();
                    if time_to_wait.is_zero() {
                        // Zero means no timeout: sleep until a release or shutdown.
                        self.shared.available.wait(&mut inner);
                    } else {
                        self.shared.available.wait_for(&mut inner, time_to_wait);
                    }
                    inner.state.counters.accumulated_wait_time += wait_started.elapsed();
                    continue;
                }
            };

            match inner.activate(candidate, username, password, started) {
                Ok(proxy) => {
                    return Ok(LogicalConnection::new(proxy, Arc::clone(&self.shared)));
                }
                Err(err) => {
                    local_bad_connections += 1;
                    if local_bad_connections > inner.config.bad_connection_limit() {
                        debug!(
                            bad = local_bad_connections,
                            "could not get a good connection to the database"
                        );
                        return Err(PoolError::PoolExhausted(format!(
                            "could not get a good connection to the database after \
                             {local_bad_connections} bad connections (last: {err})"
                        )));
                    }
                }
            }
        }
    }

    /// Check out a connection using the data source's default credentials.
    pub fn acquire_default(&self) -> PoolResult<LogicalConnection> {
        let (username, password) = {
            let inner = self.shared.inner.lock();
            (
                inner.datasource.username.clone(),
                inner.datasource.password.clone(),
            )
        };
        self.acquire(username.as_deref(), password.as_deref())
    }

    /// Invalidate and close every connection, idle or checked out.
    ///
    /// Per-connection failures are logged and skipped.
    pub fn force_close_all(&self) {
        self.shared.inner.lock().force_close_all();
        self.shared.available.notify_all();
    }

    /// Close the pool. Waiting callers fail with [`PoolError::WaitInterrupted`]
    /// and later calls with [`PoolError::Closed`].
    pub fn close(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.closed = true;
            inner.force_close_all();
        }
        self.shared.available.notify_all();
        info!("connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    pub fn statistics(&self) -> PoolStatistics {
        self.shared.inner.lock().state.snapshot()
    }

    pub fn idle_count(&self) -> usize {
        self.shared.inner.lock().state.idle.len()
    }

    pub fn active_count(&self) -> usize {
        self.shared.inner.lock().state.active.len()
    }

    pub fn config(&self) -> PoolConfig {
        self.shared.inner.lock().config.clone()
    }

    pub fn datasource(&self) -> DataSource {
        self.shared.inner.lock().datasource.clone()
    }

    /// Fingerprint a returning connection must carry to re-enter the idle queue.
    pub fn expected_type_code(&self) -> ConnectionTypeCode {
        self.shared.inner.lock().expected_type_code
    }

    /// Log pool statistics at `tracing::info` level.
    pub fn log_stats(&self) {
        let stats = self.statistics();
        info!(
            active = stats.active_connections,
            idle = stats.idle_connections,
            requests = stats.request_count,
            avg_request_ms = stats.average_request_time_ms,
            avg_checkout_ms = stats.average_checkout_time_ms,
            had_to_wait = stats.had_to_wait_count,
            avg_wait_ms = stats.average_wait_time_ms,
            claimed_overdue = stats.claimed_overdue_connection_count,
            bad_connections = stats.bad_connection_count,
            "pool statistics"
        );
    }

    // ── Configuration surface ───────────────────────────────────────

    /// Apply a settings change and force-close the pool.
    fn reconfigure(&self, apply: impl FnOnce(&mut PoolInner)) {
        {
            let mut inner = self.shared.inner.lock();
            apply(&mut *inner);
            inner.force_close_all();
        }
        self.shared.available.notify_all();
    }

    pub fn set_max_active(&self, max_active: usize) {
        self.reconfigure(|inner| inner.config.max_active = max_active);
    }

    pub fn set_max_idle(&self, max_idle: usize) {
        self.reconfigure(|inner| inner.config.max_idle = max_idle);
    }

    pub fn set_max_checkout_time(&self, max_checkout_time: std::time::Duration) {
        self.reconfigure(|inner| inner.config.max_checkout_time = max_checkout_time);
    }

    pub fn set_time_to_wait(&self, time_to_wait: std::time::Duration) {
        self.reconfigure(|inner| inner.config.time_to_wait = time_to_wait);
    }

    /// Takes effect on the next acquire; connections are left alone.
    pub fn set_local_bad_connection_tolerance(&self, tolerance: usize) {
        self.shared.inner.lock().config.local_bad_connection_tolerance = tolerance;
    }

    pub fn set_ping_enabled(&self, enabled: bool) {
        self.reconfigure(|inner| inner.config.ping_enabled = enabled);
    }

    pub fn set_ping_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.reconfigure(|inner| inner.config.ping_query = query);
    }

    pub fn set_ping_not_used_for(&self, not_used_for: std::time::Duration) {
        self.reconfigure(|inner| inner.config.ping_not_used_for = not_used_for);
    }

    pub fn set_url(&self, url: impl Into<String>) {
        let url = url.into();
        self.reconfigure(|inner| inner.datasource.url = url);
    }

    pub fn set_username(&self, username: Option<String>) {
        self.reconfigure(|inner| inner.datasource.username = username);
    }

    pub fn set_password(&self, password: Option<String>) {
        self.reconfigure(|inner| inner.datasource.password = password);
    }

    pub fn set_driver_properties(&self, properties: std::collections::HashMap<String, String>) {
        self.reconfigure(|inner| inner.datasource.properties = properties);
    }

    pub fn set_default_auto_commit(&self, auto_commit: Option<bool>) {
        self.reconfigure(|inner| inner.datasource.default_auto_commit = auto_commit);
    }

    pub fn set_default_transaction_isolation(&self, level: Option<IsolationLevel>) {
        self.reconfigure(|inner| inner.datasource.default_isolation = level);
    }

    pub fn set_default_network_timeout(&self, timeout: Option<std::time::Duration>) {
        self.reconfigure(|inner| inner.datasource.default_network_timeout = timeout);
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.inner.lock();
        f.debug_struct("ConnectionPool")
            .field("datasource", &inner.datasource)
            .field("config", &inner.config)
            .field("idle", &inner.state.idle.len())
            .field("active", &inner.state.active.len())
            .field("closed", &inner.closed)
            .finish_non_exhaustive()
    }
}
