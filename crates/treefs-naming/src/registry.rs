//! Storage server registry and placement policy.
//!
//! Tracks every registered storage server and which servers host which
//! paths. Servers are never removed. A path can be hosted by several
//! servers (directories shared by many servers, or replicas of hot files);
//! the host list keeps registration order.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use crate::path::Path;
use crate::storage::{CommandHandle, StorageHandle};
use crate::types::{NamingError, Result, ServerId};

/// A registered storage server.
#[derive(Clone)]
pub struct StorageServerRecord {
    /// Registry-assigned identifier.
    pub id: ServerId,
    /// Administrative handle (create/delete).
    pub command: Arc<dyn CommandHandle>,
    /// Data handle given to clients.
    pub storage: Arc<dyn StorageHandle>,
    /// Last advertised capacity.
    pub capacity: u64,
    /// Paths known to be hosted on this server.
    pub hosted: BTreeSet<Path>,
}

impl std::fmt::Debug for StorageServerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageServerRecord")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("hosted", &self.hosted.len())
            .finish()
    }
}

#[derive(Default)]
struct RegistryInner {
    servers: Vec<StorageServerRecord>,
    hosts: HashMap<Path, Vec<ServerId>>,
}

impl RegistryInner {
    fn server_mut(&mut self, id: ServerId) -> Result<&mut StorageServerRecord> {
        self.servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| NamingError::InvalidState(format!("storage server {} is not registered", id)))
    }

    fn add_host(&mut self, path: &Path, id: ServerId) -> Result<()> {
        let hosts = self.hosts.entry(path.clone()).or_default();
        if !hosts.contains(&id) {
            hosts.push(id);
        }
        self.server_mut(id)?.hosted.insert(path.clone());
        Ok(())
    }
}

/// Registry of storage servers.
pub struct StorageRegistry {
    inner: RwLock<RegistryInner>,
}

impl StorageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Adds a server record and returns its id.
    ///
    /// Fails with `InvalidState` if the same command handle was already
    /// registered.
    pub fn add_server(
        &self,
        storage: Arc<dyn StorageHandle>,
        command: Arc<dyn CommandHandle>,
        capacity: u64,
    ) -> Result<ServerId> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;

        let command_ptr = Arc::as_ptr(&command) as *const ();
        if inner
            .servers
            .iter()
            .any(|s| Arc::as_ptr(&s.command) as *const () == command_ptr)
        {
            return Err(NamingError::InvalidState(
                "storage server is already registered".to_string(),
            ));
        }

        let id = ServerId::new(inner.servers.len() as u64 + 1);
        inner.servers.push(StorageServerRecord {
            id,
            command,
            storage,
            capacity,
            hosted: BTreeSet::new(),
        });
        Ok(id)
    }

    /// Records `server` as a host of `path` and of every ancestor of it.
    pub fn record_host(&self, path: &Path, server: ServerId) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        for ancestor in path.ancestors() {
            inner.add_host(&ancestor, server)?;
        }
        inner.add_host(path, server)
    }

    /// Removes host records for `path` and everything below it.
    pub fn forget_subtree(&self, path: &Path) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        inner.hosts.retain(|p, _| !p.is_subpath_of(path));
        for server in &mut inner.servers {
            server.hosted.retain(|p| !p.is_subpath_of(path));
        }
        Ok(())
    }

    /// Returns true if at least one server hosts `path`.
    pub fn is_hosted(&self, path: &Path) -> bool {
        self.inner
            .read()
            .map(|inner| inner.hosts.get(path).is_some_and(|h| !h.is_empty()))
            .unwrap_or(false)
    }

    /// Servers hosting `path`, in the order they started hosting it.
    pub fn resolve_servers(&self, path: &Path) -> Result<Vec<StorageServerRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        let Some(ids) = inner.hosts.get(path) else {
            return Ok(Vec::new());
        };
        ids.iter()
            .map(|id| {
                inner
                    .servers
                    .iter()
                    .find(|s| s.id == *id)
                    .cloned()
                    .ok_or_else(|| {
                        NamingError::InvalidState(format!(
                            "{} is hosted by unknown storage server {}",
                            path, id
                        ))
                    })
            })
            .collect()
    }

    /// The server with the strictly greatest capacity; ties go to the
    /// earliest registered.
    pub fn choose_placement_target(&self) -> Result<StorageServerRecord> {
        let inner = self
            .inner
            .read()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        Self::largest(inner.servers.iter())
            .cloned()
            .ok_or(NamingError::NoStorageServers)
    }

    /// Largest-capacity server that does not host `path` yet, if any.
    pub fn replica_candidate(&self, path: &Path) -> Result<Option<StorageServerRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        let hosts = inner.hosts.get(path).cloned().unwrap_or_default();
        Ok(Self::largest(inner.servers.iter().filter(|s| !hosts.contains(&s.id))).cloned())
    }

    /// Replaces the advertised capacity of a server.
    pub fn update_capacity(&self, server: ServerId, capacity: u64) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        inner.server_mut(server)?.capacity = capacity;
        Ok(())
    }

    /// Record for a server id.
    pub fn server(&self, id: ServerId) -> Result<StorageServerRecord> {
        let inner = self
            .inner
            .read()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        inner
            .servers
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| NamingError::InvalidState(format!("storage server {} is not registered", id)))
    }

    /// Number of registered servers.
    pub fn server_count(&self) -> usize {
        self.inner.read().map(|inner| inner.servers.len()).unwrap_or(0)
    }

    fn largest<'a, I>(servers: I) -> Option<&'a StorageServerRecord>
    where
        I: Iterator<Item = &'a StorageServerRecord>,
    {
        servers.fold(None, |best: Option<&StorageServerRecord>, s| match best {
            Some(b) if b.capacity >= s.capacity => Some(b),
            _ => Some(s),
        })
    }
}

impl Default for StorageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
