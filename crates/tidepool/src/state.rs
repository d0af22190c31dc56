//! Pool state: idle queue, active list, and running counters.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::proxy::ConnectionProxy;

/// Running totals updated by checkout, release, and overdue reclaim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct PoolCounters {
    pub request_count: u64,
    pub accumulated_request_time: Duration,
    pub accumulated_checkout_time: Duration,
    pub claimed_overdue_connection_count: u64,
    pub accumulated_checkout_time_of_overdue_connections: Duration,
    pub had_to_wait_count: u64,
    pub accumulated_wait_time: Duration,
    pub bad_connection_count: u64,
}

/// Idle queue and active list. Only touched under the pool lock.
#[derive(Debug, Default)]
pub(crate) struct PoolState {
    /// Front is the oldest idle connection, served first.
    pub idle: VecDeque<Arc<ConnectionProxy>>,
    /// Front is the oldest checkout, the first candidate for overdue reclaim.
    pub active: VecDeque<Arc<ConnectionProxy>>,
    pub counters: PoolCounters,
}

impl PoolState {
    /// Remove `proxy` from the active list. Returns whether it was there.
    pub fn remove_active(&mut self, proxy: &Arc<ConnectionProxy>) -> bool {
        match self.active.iter().position(|p| Arc::ptr_eq(p, proxy)) {
            Some(index) => {
                self.active.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> PoolStatistics {
        PoolStatistics::from_counters(&self.counters, self.idle.len(), self.active.len())
    }
}

/// Read-only snapshot of pool activity.
///
/// Durations are reported in whole milliseconds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatistics {
    pub request_count: u64,
    pub accumulated_request_time_ms: u64,
    pub accumulated_checkout_time_ms: u64,
    pub had_to_wait_count: u64,
    pub accumulated_wait_time_ms: u64,
    pub bad_connection_count: u64,
    pub claimed_overdue_connection_count: u64,
    pub accumulated_checkout_time_of_overdue_connections_ms: u64,
    pub average_request_time_ms: u64,
    pub average_checkout_time_ms: u64,
    pub average_wait_time_ms: u64,
    pub average_overdue_checkout_time_ms: u64,
    pub idle_connections: usize,
    pub active_connections: usize,
}

impl PoolStatistics {
    pub(crate) fn from_counters(counters: &PoolCounters, idle: usize, active: usize) -> Self {
        let ms = |d: Duration| d.as_millis() as u64;
        let average = |total: Duration, count: u64| {
            if count == 0 { 0 } else { ms(total) / count }
        };

        Self {
            request_count: counters.request_count,
            accumulated_request_time_ms: ms(counters.accumulated_request_time),
            accumulated_checkout_time_ms: ms(counters.accumulated_checkout_time),
            had_to_wait_count: counters.had_to_wait_count,
            accumulated_wait_time_ms: ms(counters.accumulated_wait_time),
            bad_connection_count: counters.bad_connection_count,
            claimed_overdue_connection_count: counters.claimed_overdue_connection_count,
            accumulated_checkout_time_of_overdue_connections_ms: ms(
                counters.accumulated_checkout_time_of_overdue_connections,
            ),
            average_request_time_ms: average(
                counters.accumulated_request_time,
                counters.request_count,
            ),
            average_checkout_time_ms: average(
                counters.accumulated_checkout_time,
                counters.request_count,
            ),
            average_wait_time_ms: average(
                counters.accumulated_wait_time,
                counters.had_to_wait_count,
            ),
            average_overdue_checkout_time_ms: average(
                counters.accumulated_checkout_time_of_overdue_connections,
                counters.claimed_overdue_connection_count,
            ),
            idle_connections: idle,
            active_connections: active,
        }
    }
}

impl fmt::Display for PoolStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== POOL STATUS ===")?;
        writeln!(f, " active connections          {}", self.active_connections)?;
        writeln!(f, " idle connections            {}", self.idle_connections)?;
        writeln!(f, " request count               {}", self.request_count)?;
        writeln!(f, " average request time        {}ms", self.average_request_time_ms)?;
        writeln!(f, " average checkout time       {}ms", self.average_checkout_time_ms)?;
        writeln!(f, " claimed overdue             {}", self.claimed_overdue_connection_count)?;
        writeln!(f, " average overdue checkout    {}ms", self.average_overdue_checkout_time_ms)?;
        writeln!(f, " had to wait                 {}", self.had_to_wait_count)?;
        writeln!(f, " average wait time           {}ms", self.average_wait_time_ms)?;
        write!(f, " bad connection count        {}", self.bad_connection_count)
    }
}
