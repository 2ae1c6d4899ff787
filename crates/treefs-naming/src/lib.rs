#![warn(missing_docs)]

//! TreeFS naming server: path hierarchy, hierarchical path locking and
//! storage server placement for a distributed file system.

pub mod config;
pub mod directory;
pub mod locking;
pub mod path;
pub mod registry;
pub mod replication;
pub mod service;
pub mod storage;
pub mod types;

pub use config::NamingConfig;
pub use locking::{LockManager, LockState, PathLockGuard};
pub use path::Path;
pub use replication::{ReplicationHandle, ReplicationStats};
pub use service::NamingService;
pub use storage::{CommandHandle, MemoryStorageServer, RemoteError, StorageHandle};
pub use types::{EntryKind, HotPathItem, LockMode, NamingError, ServerId};
