//! Unpooled data source: opens and configures fresh physical connections.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tidepool_core::{ConnectionTypeCode, DataSourceSection, IsolationLevel};
use tracing::{debug, warn};

use crate::connection::{Connection, ConnectionFactory};
use crate::error::ConnectionError;

/// Connection settings plus the factory used to open physical connections.
///
/// Every connection it opens is configured with the data source defaults
/// (network timeout, auto-commit mode, isolation level) before it is handed
/// to the pool.
#[derive(Clone)]
pub struct DataSource {
    pub(crate) url: String,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) properties: HashMap<String, String>,
    pub(crate) default_auto_commit: Option<bool>,
    pub(crate) default_isolation: Option<IsolationLevel>,
    pub(crate) default_network_timeout: Option<Duration>,
    factory: Arc<dyn ConnectionFactory>,
}

impl DataSource {
    pub fn new(url: impl Into<String>, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            properties: HashMap::new(),
            default_auto_commit: None,
            default_isolation: None,
            default_network_timeout: None,
            factory,
        }
    }

    /// Build a data source from the `[datasource]` section of a config file.
    pub fn from_section(section: &DataSourceSection, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            url: section.url.clone(),
            username: section.username.clone(),
            password: section.password.clone(),
            properties: section.properties.clone().unwrap_or_default(),
            default_auto_commit: section.auto_commit,
            default_isolation: section.isolation,
            default_network_timeout: section.network_timeout_ms.map(Duration::from_millis),
            factory,
        }
    }

    /// Builder method: set the default credentials.
    pub fn with_credentials(self, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            ..self
        }
    }

    /// Builder method: set driver properties passed to the factory.
    pub fn with_properties(self, properties: HashMap<String, String>) -> Self {
        Self { properties, ..self }
    }

    /// Builder method: force the auto-commit mode of new connections.
    pub fn with_auto_commit(self, auto_commit: bool) -> Self {
        Self {
            default_auto_commit: Some(auto_commit),
            ..self
        }
    }

    /// Builder method: set the isolation level of new connections.
    pub fn with_isolation(self, level: IsolationLevel) -> Self {
        Self {
            default_isolation: Some(level),
            ..self
        }
    }

    /// Builder method: set the network timeout of new connections.
    pub fn with_network_timeout(self, timeout: Duration) -> Self {
        Self {
            default_network_timeout: Some(timeout),
            ..self
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }

    pub fn default_auto_commit(&self) -> Option<bool> {
        self.default_auto_commit
    }

    pub fn default_isolation(&self) -> Option<IsolationLevel> {
        self.default_isolation
    }

    pub fn default_network_timeout(&self) -> Option<Duration> {
        self.default_network_timeout
    }

    /// Fingerprint of the default credentials.
    pub fn type_code(&self) -> ConnectionTypeCode {
        self.type_code_for(self.username(), self.password())
    }

    /// Fingerprint of this data source's url with the given credentials.
    pub fn type_code_for(&self, username: Option<&str>, password: Option<&str>) -> ConnectionTypeCode {
        ConnectionTypeCode::new(&self.url, username, password)
    }

    /// Open a physical connection with the default credentials.
    pub fn open_default(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        self.open(self.username(), self.password())
    }

    /// Open and configure a physical connection.
    ///
    /// If configuring fails the connection is closed before the error is returned.
    pub fn open(
        &self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<Box<dyn Connection>, ConnectionError> {
        let mut conn = self
            .factory
            .open(&self.url, username, password, &self.properties)?;

        if let Err(err) = self.configure(conn.as_mut()) {
            debug!(url = %self.url, error = %err, "failed to configure new connection");
            if let Err(close_err) = conn.close() {
                warn!(
                    url = %self.url,
                    error = %close_err,
                    "error while closing unconfigured connection"
                );
            }
            return Err(err);
        }
        Ok(conn)
    }

    fn configure(&self, conn: &mut dyn Connection) -> Result<(), ConnectionError> {
        if let Some(timeout) = self.default_network_timeout {
            conn.set_network_timeout(timeout)?;
        }
        if let Some(auto_commit) = self.default_auto_commit {
            if conn.auto_commit()? != auto_commit {
                conn.set_auto_commit(auto_commit)?;
            }
        }
        if let Some(level) = self.default_isolation {
            conn.set_transaction_isolation(level)?;
        }
        Ok(())
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait) ────────────────

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("default_auto_commit", &self.default_auto_commit)
            .field("default_isolation", &self.default_isolation)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFactory;

    fn factory() -> Arc<MockFactory> {
        Arc::new(MockFactory::new())
    }

    #[test]
    fn open_passes_url_credentials_and_properties() {
        let factory = factory();
        let props = HashMap::from([("sslmode".to_string(), "disable".to_string())]);
        let source = DataSource::new("postgres://db/app", factory.clone())
            .with_credentials("app", "secret")
            .with_properties(props.clone());

        source.open_default().unwrap();

        let call = factory.last_open().unwrap();
        assert_eq!(call.url, "postgres://db/app");
        assert_eq!(call.username.as_deref(), Some("app"));
        assert_eq!(call.password.as_deref(), Some("secret"));
        assert_eq!(call.properties, props);
    }

    #[test]
    fn open_applies_connection_defaults() {
        let factory = factory();
        let source = DataSource::new("postgres://db/app", factory.clone())
            .with_auto_commit(false)
            .with_isolation(IsolationLevel::Serializable)
            .with_network_timeout(Duration::from_secs(3));

        let conn = source.open_default().unwrap();

        assert!(!conn.auto_commit().unwrap());
        let state = factory.connection(0);
        assert_eq!(state.isolation(), Some(IsolationLevel::Serializable));
        assert_eq!(state.network_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn open_leaves_matching_auto_commit_untouched() {
        let factory = factory();
        let source = DataSource::new("postgres://db/app", factory.clone()).with_auto_commit(true);

        source.open_default().unwrap();

        assert_eq!(factory.connection(0).auto_commit_changes(), 0);
    }

    #[test]
    fn configure_failure_closes_connection() {
        let factory = factory();
        factory.fail_configure(true);
        let source = DataSource::new("postgres://db/app", factory.clone())
            .with_isolation(IsolationLevel::ReadCommitted);

        let err = source.open_default().unwrap_err();

        assert!(matches!(err, ConnectionError::Transaction(_)));
        assert!(factory.connection(0).is_physically_closed());
    }

    #[test]
    fn connect_failure_propagates() {
        let factory = factory();
        factory.fail_connect(true);
        let source = DataSource::new("postgres://db/app", factory.clone());

        let err = source.open_default().unwrap_err();
        assert!(matches!(err, ConnectionError::Connect(_)));
        assert_eq!(factory.opened(), 0);
    }

    #[test]
    fn type_code_tracks_credentials() {
        let source = DataSource::new("postgres://db/app", factory()).with_credentials("app", "secret");
        assert_eq!(source.type_code(), source.type_code_for(Some("app"), Some("secret")));
        assert_ne!(source.type_code(), source.type_code_for(Some("app"), Some("other")));
    }
}
