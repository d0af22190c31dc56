//! Liveness check applied to connections before reuse and on return.

use std::time::Duration;

use tracing::{debug, warn};

use crate::config::PoolConfig;
use crate::connection::rollback_if_needed;
use crate::error::{ConnectionError, PoolError, PoolResult};
use crate::proxy::ConnectionProxy;

/// Decides whether a proxy's connection is still usable.
///
/// The closed check always runs. The ping query runs only when pinging is
/// enabled and the connection has sat unused for longer than
/// `ping_not_used_for`.
#[derive(Debug)]
pub(crate) struct Validator<'a> {
    ping_enabled: bool,
    ping_query: &'a str,
    ping_not_used_for: Duration,
}

impl<'a> Validator<'a> {
    pub(crate) fn new(config: &'a PoolConfig) -> Self {
        Self {
            ping_enabled: config.ping_enabled,
            ping_query: &config.ping_query,
            ping_not_used_for: config.ping_not_used_for,
        }
    }

    /// Check `proxy`. On failure the proxy is invalidated and its physical
    /// connection closed.
    pub(crate) fn check(&self, proxy: &ConnectionProxy) -> PoolResult<()> {
        let real_id = proxy.real_id();
        let needs_ping = self.ping_enabled && proxy.time_since_last_use() > self.ping_not_used_for;

        let outcome = proxy.with_conn(|conn| {
            if conn.is_closed()? {
                return Err(ConnectionError::Closed);
            }
            if needs_ping {
                debug!(real_id, query = self.ping_query, "testing connection");
                if let Err(err) = conn.probe(self.ping_query) {
                    warn!(
                        real_id,
                        query = self.ping_query,
                        error = %err,
                        "execution of ping query failed"
                    );
                    return Err(err);
                }
                rollback_if_needed(conn)?;
                debug!(real_id, "connection is good");
            }
            Ok(())
        });

        outcome.map_err(|err| {
            if let Some(mut conn) = proxy.invalidate() {
                if let Err(close_err) = conn.close() {
                    warn!(real_id, error = %close_err, "error while closing bad connection");
                }
            }
            debug!(real_id, error = %err, "connection is bad");
            PoolError::BadConnection {
                real_id,
                reason: err.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionFactory;
    use crate::mock::MockFactory;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn proxy(factory: &MockFactory) -> Arc<ConnectionProxy> {
        let conn = factory
            .open("mock://db", None, None, &HashMap::new())
            .unwrap();
        ConnectionProxy::new(1, conn)
    }

    fn ping_config(not_used_for: Duration) -> PoolConfig {
        PoolConfig {
            ping_enabled: true,
            ping_query: "SELECT 1".to_string(),
            ping_not_used_for: not_used_for,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn healthy_connection_passes_without_ping() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        let config = PoolConfig::default();

        Validator::new(&config).check(&p).unwrap();

        assert!(p.is_valid());
        assert_eq!(factory.connection(0).probes(), 0);
    }

    #[test]
    fn closed_connection_is_bad_without_ping() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        factory.connection(0).kill();
        let config = PoolConfig::default();

        let err = Validator::new(&config).check(&p).unwrap_err();

        assert!(matches!(err, PoolError::BadConnection { real_id: 1, .. }));
        assert!(!p.is_valid());
        assert!(factory.connection(0).is_physically_closed());
    }

    #[test]
    fn ping_runs_after_idle_threshold() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        let config = ping_config(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(10));

        Validator::new(&config).check(&p).unwrap();

        assert_eq!(factory.connection(0).probes(), 1);
    }

    #[test]
    fn ping_skipped_for_recently_used_connection() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        let config = ping_config(Duration::from_secs(60));

        Validator::new(&config).check(&p).unwrap();

        assert_eq!(factory.connection(0).probes(), 0);
    }

    #[test]
    fn failed_ping_invalidates_and_closes() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        factory.connection(0).break_probe();
        let config = ping_config(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));

        let err = Validator::new(&config).check(&p).unwrap_err();

        assert!(matches!(err, PoolError::BadConnection { .. }));
        assert!(!p.is_valid());
        assert!(factory.connection(0).is_physically_closed());
    }

    #[test]
    fn successful_ping_rolls_back_manual_commit_connection() {
        let factory = MockFactory::new();
        factory.manual_commit(true);
        let p = proxy(&factory);
        let config = ping_config(Duration::ZERO);
        std::thread::sleep(Duration::from_millis(2));

        Validator::new(&config).check(&p).unwrap();

        assert_eq!(factory.connection(0).rollbacks(), 1);
    }

    #[test]
    fn close_error_on_bad_connection_is_not_raised() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        factory.connection(0).kill();
        factory.connection(0).break_close();
        let config = PoolConfig::default();

        let err = Validator::new(&config).check(&p).unwrap_err();

        assert!(matches!(err, PoolError::BadConnection { real_id: 1, .. }));
        assert!(!p.is_valid());
        assert_eq!(factory.connection(0).closes(), 1);
    }

    #[test]
    fn invalidated_proxy_is_bad() {
        let factory = MockFactory::new();
        let p = proxy(&factory);
        p.invalidate();
        let config = PoolConfig::default();

        assert!(Validator::new(&config).check(&p).is_err());
    }
}
