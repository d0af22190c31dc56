//! tidepool.toml configuration parser.
//!
//! ```toml
//! [datasource]
//! url = "postgres://db.internal:5432/app"
//! username = "app"
//! password = "secret"
//! auto_commit = false
//! isolation = "read_committed"
//!
//! [pool]
//! max_active = 20
//! max_idle = 8
//! ping_enabled = true
//! ping_query = "SELECT 1"
//! ping_not_used_for_ms = 30000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{ConfigError, ConfigResult};
use crate::types::{DEFAULT_PING_QUERY, IsolationLevel};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolFileConfig {
    pub datasource: DataSourceSection,
    pub pool: Option<PoolSection>,
}

/// Where physical connections come from and how they are configured once opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceSection {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub properties: Option<HashMap<String, String>>,
    pub auto_commit: Option<bool>,
    pub isolation: Option<IsolationLevel>,
    pub network_timeout_ms: Option<u64>,
}

/// Pool thresholds. Absent fields fall back to the pool defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolSection {
    pub max_active: Option<usize>,
    pub max_idle: Option<usize>,
    pub max_checkout_time_ms: Option<u64>,
    pub time_to_wait_ms: Option<u64>,
    pub local_bad_connection_tolerance: Option<usize>,
    pub ping_enabled: Option<bool>,
    pub ping_query: Option<String>,
    pub ping_not_used_for_ms: Option<u64>,
}

impl PoolFileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        Ok(config)
    }

    /// Parse and validate a config document.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: PoolFileConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.datasource.url.trim().is_empty() {
            return Err(ConfigError::Invalid("datasource.url must not be empty".to_string()));
        }

        let Some(pool) = &self.pool else {
            return Ok(());
        };

        if pool.max_active == Some(0) {
            return Err(ConfigError::Invalid(
                "pool.max_active must be at least 1".to_string(),
            ));
        }

        if pool.ping_enabled.unwrap_or(false) {
            let query = pool.ping_query.as_deref().unwrap_or(DEFAULT_PING_QUERY);
            if query.trim().is_empty() || query == DEFAULT_PING_QUERY {
                return Err(ConfigError::Invalid(
                    "pool.ping_enabled requires pool.ping_query".to_string(),
                ));
            }
        }

        Ok(())
    }
}
