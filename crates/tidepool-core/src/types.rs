//! Shared types: transaction isolation levels and connection fingerprints.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ping query used when none has been configured.
///
/// A pool with pinging enabled and this query still in place is rejected by
/// config validation.
pub const DEFAULT_PING_QUERY: &str = "NO PING QUERY SET";

/// Transaction isolation level applied to freshly opened connections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    /// Transactions are not supported.
    None,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::None => write!(f, "none"),
            IsolationLevel::ReadUncommitted => write!(f, "read uncommitted"),
            IsolationLevel::ReadCommitted => write!(f, "read committed"),
            IsolationLevel::RepeatableRead => write!(f, "repeatable read"),
            IsolationLevel::Serializable => write!(f, "serializable"),
        }
    }
}

/// Fingerprint of the `(url, username, password)` triple a physical
/// connection was checked out under.
///
/// The pool compares a returning connection's code against the code of its
/// current data source settings; a mismatch means the connection belongs to
/// a stale configuration and must not go back to the idle queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionTypeCode(u64);

impl ConnectionTypeCode {
    pub fn new(url: &str, username: Option<&str>, password: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        // Length-prefixed so ("ab", "c") and ("a", "bc") never collide.
        for part in [Some(url), username, password] {
            match part {
                Some(value) => {
                    hasher.update([1u8]);
                    hasher.update((value.len() as u64).to_be_bytes());
                    hasher.update(value.as_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(prefix))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionTypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}
