//! Core types shared by the naming service modules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::path::Path;
use crate::storage::RemoteError;

/// Identifies a registered storage server, assigned in registration order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(u64);

impl ServerId {
    /// Creates a new ServerId from a raw u64 value
    pub fn new(id: u64) -> Self {
        ServerId(id)
    }

    /// Returns the raw u64 value of this server ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mode in which a path lock is requested or held.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared lock, any number of concurrent holders.
    Shared,
    /// Exclusive lock, a single holder.
    Exclusive,
}

impl LockMode {
    /// Maps the boolean `exclusive` flag used on the wire to a mode.
    pub fn from_exclusive(exclusive: bool) -> Self {
        if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }

    /// Returns true for [`LockMode::Exclusive`].
    pub fn is_exclusive(&self) -> bool {
        matches!(self, LockMode::Exclusive)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Kind of a name stored in the path hierarchy
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// A file name held directly by its parent directory
    File,
    /// A subdirectory
    Directory,
}

/// A path whose access counter just crossed the replication threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HotPathItem {
    /// The hot path.
    pub path: Path,
    /// Counter value at the crossing (a multiple of the threshold).
    pub access_count: u64,
}

/// Error types for naming service operations
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    /// The path, or a required ancestor, does not exist.
    #[error("path {0} not found")]
    NotFound(Path),

    /// The textual path could not be normalized.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// Unbalanced lock/unlock, or a structural invariant would be broken.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A storage server call failed in transport or remote execution.
    #[error("remote failure: {0}")]
    RemoteFailure(#[from] RemoteError),

    /// A placement decision was needed but no storage server is registered.
    #[error("no storage servers registered")]
    NoStorageServers,

    /// The lock scheduler has shut down.
    #[error("lock scheduler stopped")]
    SchedulerStopped,

    /// Configuration could not be loaded or failed validation.
    #[error("config error: {0}")]
    Config(String),
}

/// Result alias used throughout the naming service.
pub type Result<T> = std::result::Result<T, NamingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_mode_from_exclusive() {
        assert_eq!(LockMode::from_exclusive(true), LockMode::Exclusive);
        assert_eq!(LockMode::from_exclusive(false), LockMode::Shared);
        assert!(LockMode::Exclusive.is_exclusive());
        assert!(!LockMode::Shared.is_exclusive());
    }

    #[test]
    fn test_server_id_display() {
        assert_eq!(ServerId::new(7).to_string(), "7");
        assert!(ServerId::new(1) < ServerId::new(2));
    }

    #[test]
    fn test_error_messages() {
        let err = NamingError::NotFound(Path::root().join("a").unwrap());
        assert_eq!(err.to_string(), "path /data/a not found");

        let err: NamingError = RemoteError::new("connection reset").into();
        assert!(matches!(err, NamingError::RemoteFailure(_)));
        assert_eq!(err.to_string(), "remote failure: connection reset");
    }
}
