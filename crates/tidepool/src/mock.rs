//! In-memory connections and factory shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tidepool_core::IsolationLevel;

use crate::connection::{Connection, ConnectionFactory};
use crate::error::ConnectionError;

/// Observable state of one mock physical connection, shared with the test.
#[derive(Debug, Default)]
pub(crate) struct MockState {
    dead: AtomicBool,
    probe_fails: AtomicBool,
    rollback_fails: AtomicBool,
    close_fails: AtomicBool,
    configure_fails: AtomicBool,
    auto_commit: AtomicBool,
    auto_commit_changes: AtomicUsize,
    closes: AtomicUsize,
    rollbacks: AtomicUsize,
    probes: AtomicUsize,
    isolation: Mutex<Option<IsolationLevel>>,
    network_timeout: Mutex<Option<Duration>>,
    executed: Mutex<Vec<String>>,
}

impl MockState {
    /// Simulate the server dropping the connection.
    pub(crate) fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    pub(crate) fn break_probe(&self) {
        self.probe_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn break_rollback(&self) {
        self.rollback_fails.store(true, Ordering::SeqCst);
    }

    /// `close` still marks the connection closed but reports an error.
    pub(crate) fn break_close(&self) {
        self.close_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_physically_closed(&self) -> bool {
        self.closes.load(Ordering::SeqCst) > 0
    }

    pub(crate) fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub(crate) fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub(crate) fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub(crate) fn auto_commit_changes(&self) -> usize {
        self.auto_commit_changes.load(Ordering::SeqCst)
    }

    pub(crate) fn isolation(&self) -> Option<IsolationLevel> {
        *self.isolation.lock()
    }

    pub(crate) fn network_timeout(&self) -> Option<Duration> {
        *self.network_timeout.lock()
    }

    pub(crate) fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }
}

#[derive(Debug)]
pub(crate) struct MockConnection {
    state: Arc<MockState>,
}

impl MockConnection {
    fn check_open(&self) -> Result<(), ConnectionError> {
        if self.state.dead.load(Ordering::SeqCst) || self.state.is_physically_closed() {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn is_closed(&self) -> Result<bool, ConnectionError> {
        Ok(self.state.dead.load(Ordering::SeqCst) || self.state.is_physically_closed())
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        self.check_open()?;
        Ok(self.state.auto_commit.load(Ordering::SeqCst))
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), ConnectionError> {
        self.check_open()?;
        self.state.auto_commit.store(auto_commit, Ordering::SeqCst);
        self.state.auto_commit_changes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_transaction_isolation(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.check_open()?;
        if self.state.configure_fails.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transaction("isolation rejected".to_string()));
        }
        *self.state.isolation.lock() = Some(level);
        Ok(())
    }

    fn set_network_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.check_open()?;
        *self.state.network_timeout.lock() = Some(timeout);
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64, ConnectionError> {
        self.check_open()?;
        self.state.executed.lock().push(sql.to_string());
        Ok(1)
    }

    fn probe(&mut self, _query: &str) -> Result<(), ConnectionError> {
        self.check_open()?;
        self.state.probes.fetch_add(1, Ordering::SeqCst);
        if self.state.probe_fails.load(Ordering::SeqCst) {
            return Err(ConnectionError::Query("server went away".to_string()));
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.check_open()
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.check_open()?;
        if self.state.rollback_fails.load(Ordering::SeqCst) {
            return Err(ConnectionError::Transaction("rollback failed".to_string()));
        }
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        if self.state.close_fails.load(Ordering::SeqCst) {
            return Err(ConnectionError::Closed);
        }
        Ok(())
    }
}

/// Arguments of one `open` call.
#[derive(Clone, Debug)]
pub(crate) struct OpenCall {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub properties: HashMap<String, String>,
}

#[derive(Debug, Default)]
pub(crate) struct MockFactory {
    connections: Mutex<Vec<Arc<MockState>>>,
    calls: Mutex<Vec<OpenCall>>,
    fail_connect: AtomicBool,
    fail_configure: AtomicBool,
    manual_commit: AtomicBool,
    born_dead: AtomicBool,
}

impl MockFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Number of physical connections opened so far.
    pub(crate) fn opened(&self) -> usize {
        self.connections.lock().len()
    }

    pub(crate) fn connection(&self, index: usize) -> Arc<MockState> {
        Arc::clone(&self.connections.lock()[index])
    }

    pub(crate) fn last_open(&self) -> Option<OpenCall> {
        self.calls.lock().last().cloned()
    }

    pub(crate) fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_configure(&self, fail: bool) {
        self.fail_configure.store(fail, Ordering::SeqCst);
    }

    /// New connections start with auto-commit off.
    pub(crate) fn manual_commit(&self, manual: bool) {
        self.manual_commit.store(manual, Ordering::SeqCst);
    }

    /// New connections report themselves closed from the start.
    pub(crate) fn born_dead(&self, dead: bool) {
        self.born_dead.store(dead, Ordering::SeqCst);
    }
}

impl ConnectionFactory for MockFactory {
    fn open(
        &self,
        url: &str,
        username: Option<&str>,
        password: Option<&str>,
        properties: &HashMap<String, String>,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Connect("connection refused".to_string()));
        }

        self.calls.lock().push(OpenCall {
            url: url.to_string(),
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            properties: properties.clone(),
        });

        let state = Arc::new(MockState::default());
        state
            .auto_commit
            .store(!self.manual_commit.load(Ordering::SeqCst), Ordering::SeqCst);
        state
            .configure_fails
            .store(self.fail_configure.load(Ordering::SeqCst), Ordering::SeqCst);
        state
            .dead
            .store(self.born_dead.load(Ordering::SeqCst), Ordering::SeqCst);
        self.connections.lock().push(Arc::clone(&state));

        Ok(Box::new(MockConnection { state }))
    }
}
