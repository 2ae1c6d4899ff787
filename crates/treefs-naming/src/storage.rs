//! Storage server roles consumed by the naming service.
//!
//! A storage server exposes a *command* role used by the naming service to
//! create and delete entries, and a *data* role used directly by clients for
//! byte-level I/O. The naming service only hands data handles out; it never
//! calls them. The transport behind a handle is out of scope here, so both
//! roles are plain async traits any RPC layer can implement.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::path::Path;

/// Transport or remote-execution failure reported by a storage handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    message: String,
}

impl RemoteError {
    /// Creates a new RemoteError with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The failure description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Administrative role of a storage server.
#[async_trait]
pub trait CommandHandle: Send + Sync {
    /// Create a file. Returns false if the path already existed.
    async fn create(&self, path: &Path) -> Result<bool, RemoteError>;

    /// Create a directory. Servers without a distinct directory call create
    /// through [`CommandHandle::create`].
    async fn create_directory(&self, path: &Path) -> Result<bool, RemoteError> {
        self.create(path).await
    }

    /// Delete a file or directory tree. Returns false if nothing was deleted.
    async fn delete(&self, path: &Path) -> Result<bool, RemoteError>;
}

/// Data role of a storage server, used by clients after `get_storage`.
#[async_trait]
pub trait StorageHandle: Send + Sync {
    /// Read up to `length` bytes starting at `offset`.
    async fn read(&self, path: &Path, offset: u64, length: usize) -> Result<Vec<u8>, RemoteError>;

    /// Write `data` at `offset`, extending the file if needed.
    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<(), RemoteError>;

    /// Size of a file in bytes.
    async fn size(&self, path: &Path) -> Result<u64, RemoteError>;

    /// Copy a file's contents from another storage server.
    async fn copy(&self, path: &Path, source: Arc<dyn StorageHandle>) -> Result<bool, RemoteError>;
}

#[derive(Clone, Debug)]
enum MemEntry {
    File(Vec<u8>),
    Directory,
}

/// In-memory storage server implementing both roles.
///
/// Used for tests and for the demo servers of the `treefs-naming` binary.
/// Failure injection makes every command call return a [`RemoteError`].
pub struct MemoryStorageServer {
    entries: RwLock<BTreeMap<Path, MemEntry>>,
    failing: AtomicBool,
    create_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl MemoryStorageServer {
    /// Creates an empty server holding only the root directory.
    pub fn new() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(Path::root(), MemEntry::Directory);
        Self {
            entries: RwLock::new(entries),
            failing: AtomicBool::new(false),
            create_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a server pre-populated with empty files (and their parents).
    pub fn with_files<I: IntoIterator<Item = Path>>(files: I) -> Self {
        let server = Self::new();
        if let Ok(mut entries) = server.entries.write() {
            for file in files {
                for ancestor in file.ancestors() {
                    entries.entry(ancestor).or_insert(MemEntry::Directory);
                }
                entries.insert(file, MemEntry::File(Vec::new()));
            }
        }
        server
    }

    /// All file paths currently stored, sorted.
    pub fn inventory(&self) -> Vec<Path> {
        match self.entries.read() {
            Ok(entries) => entries
                .iter()
                .filter(|(_, e)| matches!(e, MemEntry::File(_)))
                .map(|(p, _)| p.clone())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Returns true if the path exists on this server.
    pub fn contains(&self, path: &Path) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(path))
            .unwrap_or(false)
    }

    /// Make every subsequent command call fail (or stop failing).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `create` calls received.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of `delete` calls received.
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    fn check_failing(&self) -> Result<(), RemoteError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::new("storage server unreachable"));
        }
        Ok(())
    }

    fn lock_err<E: std::fmt::Display>(e: E) -> RemoteError {
        RemoteError::new(e.to_string())
    }

    fn create_entry(&self, path: &Path, entry: MemEntry) -> Result<bool, RemoteError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        let mut entries = self.entries.write().map_err(Self::lock_err)?;

        if entries.contains_key(path) {
            return Ok(false);
        }
        for ancestor in path.ancestors() {
            match entries.get(&ancestor) {
                Some(MemEntry::File(_)) => return Ok(false),
                Some(MemEntry::Directory) => {}
                None => {
                    entries.insert(ancestor, MemEntry::Directory);
                }
            }
        }
        entries.insert(path.clone(), entry);
        Ok(true)
    }
}

impl Default for MemoryStorageServer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandHandle for MemoryStorageServer {
    async fn create(&self, path: &Path) -> Result<bool, RemoteError> {
        self.create_entry(path, MemEntry::File(Vec::new()))
    }

    async fn create_directory(&self, path: &Path) -> Result<bool, RemoteError> {
        self.create_entry(path, MemEntry::Directory)
    }

    async fn delete(&self, path: &Path) -> Result<bool, RemoteError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failing()?;
        if path.is_root() {
            return Ok(false);
        }
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        if !entries.contains_key(path) {
            return Ok(false);
        }
        entries.retain(|p, _| !p.is_subpath_of(path));
        Ok(true)
    }
}

#[async_trait]
impl StorageHandle for MemoryStorageServer {
    async fn read(&self, path: &Path, offset: u64, length: usize) -> Result<Vec<u8>, RemoteError> {
        let entries = self.entries.read().map_err(Self::lock_err)?;
        match entries.get(path) {
            Some(MemEntry::File(data)) => {
                let start = (offset as usize).min(data.len());
                let end = start.saturating_add(length).min(data.len());
                Ok(data[start..end].to_vec())
            }
            Some(MemEntry::Directory) => Err(RemoteError::new(format!("{} is a directory", path))),
            None => Err(RemoteError::new(format!("{} not found", path))),
        }
    }

    async fn write(&self, path: &Path, offset: u64, data: &[u8]) -> Result<(), RemoteError> {
        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        match entries.get_mut(path) {
            Some(MemEntry::File(contents)) => {
                let start = usize::try_from(offset)
                    .map_err(|_| RemoteError::new(format!("offset {} out of range", offset)))?;
                let end = start
                    .checked_add(data.len())
                    .ok_or_else(|| RemoteError::new(format!("offset {} out of range", offset)))?;
                if contents.len() < end {
                    contents.resize(end, 0);
                }
                contents[start..end].copy_from_slice(data);
                Ok(())
            }
            Some(MemEntry::Directory) => Err(RemoteError::new(format!("{} is a directory", path))),
            None => Err(RemoteError::new(format!("{} not found", path))),
        }
    }

    async fn size(&self, path: &Path) -> Result<u64, RemoteError> {
        let entries = self.entries.read().map_err(Self::lock_err)?;
        match entries.get(path) {
            Some(MemEntry::File(data)) => Ok(data.len() as u64),
            Some(MemEntry::Directory) => Err(RemoteError::new(format!("{} is a directory", path))),
            None => Err(RemoteError::new(format!("{} not found", path))),
        }
    }

    async fn copy(&self, path: &Path, source: Arc<dyn StorageHandle>) -> Result<bool, RemoteError> {
        let size = source.size(path).await?;
        let data = source.read(path, 0, size as usize).await?;

        let mut entries = self.entries.write().map_err(Self::lock_err)?;
        for ancestor in path.ancestors() {
            entries.entry(ancestor).or_insert(MemEntry::Directory);
        }
        entries.insert(path.clone(), MemEntry::File(data));
        Ok(true)
    }
}
