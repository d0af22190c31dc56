//! PoolConfig — pool thresholds and ping settings.

use std::time::Duration;

use tidepool_core::{DEFAULT_PING_QUERY, PoolSection};

/// Thresholds enforced by [`ConnectionPool`](crate::ConnectionPool).
///
/// Changing any of these on a live pool force-closes every connection,
/// except `local_bad_connection_tolerance`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum connections checked out at once (default: 10).
    pub max_active: usize,
    /// Maximum connections kept in the idle queue (default: 5).
    pub max_idle: usize,
    /// Checkout duration after which a connection may be reclaimed (default: 20s).
    pub max_checkout_time: Duration,
    /// How long one wait for a returned connection lasts before re-checking (default: 20s).
    /// Zero waits until a connection is returned or the pool shuts down.
    pub time_to_wait: Duration,
    /// Bad connections tolerated per acquire beyond `max_idle` (default: 3).
    pub local_bad_connection_tolerance: usize,
    /// Whether idle connections are pinged before reuse (default: false).
    pub ping_enabled: bool,
    /// Query sent as the ping.
    pub ping_query: String,
    /// Only ping connections unused for longer than this (default: 0).
    pub ping_not_used_for: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            max_checkout_time: Duration::from_millis(20_000),
            time_to_wait: Duration::from_millis(20_000),
            local_bad_connection_tolerance: 3,
            ping_enabled: false,
            ping_query: DEFAULT_PING_QUERY.to_string(),
            ping_not_used_for: Duration::ZERO,
        }
    }
}

impl PoolConfig {
    /// Build a config from the `[pool]` section of a config file, filling gaps with defaults.
    pub fn from_section(section: &PoolSection) -> Self {
        let defaults = Self::default();
        Self {
            max_active: section.max_active.unwrap_or(defaults.max_active),
            max_idle: section.max_idle.unwrap_or(defaults.max_idle),
            max_checkout_time: section
                .max_checkout_time_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_checkout_time),
            time_to_wait: section
                .time_to_wait_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.time_to_wait),
            local_bad_connection_tolerance: section
                .local_bad_connection_tolerance
                .unwrap_or(defaults.local_bad_connection_tolerance),
            ping_enabled: section.ping_enabled.unwrap_or(defaults.ping_enabled),
            ping_query: section.ping_query.clone().unwrap_or(defaults.ping_query),
            ping_not_used_for: section
                .ping_not_used_for_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.ping_not_used_for),
        }
    }

    /// Builder method: set pool size limits.
    pub fn with_limits(self, max_active: usize, max_idle: usize) -> Self {
        Self {
            max_active,
            max_idle,
            ..self
        }
    }

    /// Builder method: set the overdue threshold.
    pub fn with_max_checkout_time(self, max_checkout_time: Duration) -> Self {
        Self {
            max_checkout_time,
            ..self
        }
    }

    /// Builder method: set the per-iteration wait.
    pub fn with_time_to_wait(self, time_to_wait: Duration) -> Self {
        Self {
            time_to_wait,
            ..self
        }
    }

    /// Builder method: set the bad connection tolerance.
    pub fn with_bad_connection_tolerance(self, tolerance: usize) -> Self {
        Self {
            local_bad_connection_tolerance: tolerance,
            ..self
        }
    }

    /// Builder method: enable pinging with `query` for connections unused longer than `not_used_for`.
    pub fn with_ping(self, query: impl Into<String>, not_used_for: Duration) -> Self {
        Self {
            ping_enabled: true,
            ping_query: query.into(),
            ping_not_used_for: not_used_for,
            ..self
        }
    }

    /// Bad connections one acquire call may discard before giving up.
    pub(crate) fn bad_connection_limit(&self) -> usize {
        self.max_idle + self.local_bad_connection_tolerance
    }
}
