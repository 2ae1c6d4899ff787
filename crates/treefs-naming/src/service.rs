//! Naming service combining all subsystems.
//!
//! NamingService is the only component exposed to transports. It owns the
//! path hierarchy, storage registry, lock scheduler and replication trigger
//! of one naming server instance, and offers the client-facing `Service`
//! operations and the storage-facing `Registration` operation.
//!
//! Every client operation takes a path lock, reads or mutates the tree and
//! registry, then releases the lock. The lock is owned by a guard, so an
//! operation cancelled mid-flight releases it on drop. Remote storage calls run while only the
//! path lock is held; the tree and registry locks are never held across them.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::NamingConfig;
use crate::directory::PathHierarchy;
use crate::locking::{LockManager, LockState};
use crate::path::Path;
use crate::registry::StorageRegistry;
use crate::replication::{ReplicationHandle, ReplicationTrigger};
use crate::storage::{CommandHandle, StorageHandle};
use crate::types::{EntryKind, HotPathItem, LockMode, NamingError, Result, ServerId};

/// The naming service: primary entry point for all naming operations.
pub struct NamingService {
    tree: PathHierarchy,
    registry: StorageRegistry,
    locks: LockManager,
    replication: ReplicationHandle,
    config: NamingConfig,
}

impl NamingService {
    /// Start a naming service: spawns the lock scheduler and the replication
    /// trigger on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(config: NamingConfig) -> Result<Self> {
        config.validate()?;
        let (hot_tx, hot_rx) = mpsc::unbounded_channel();
        let replication = ReplicationTrigger::start(config.replication_queue_capacity, hot_rx);
        let locks = LockManager::start(config.replication_threshold, hot_tx);

        info!(
            threshold = config.replication_threshold,
            "naming service started"
        );
        Ok(Self {
            tree: PathHierarchy::new(),
            registry: StorageRegistry::new(),
            locks,
            replication,
            config,
        })
    }

    /// Stop the lock scheduler. Waiting and later lock requests fail with
    /// `SchedulerStopped`; the replication trigger drains and exits.
    pub async fn shutdown(&self) {
        self.locks.shutdown().await;
        info!("naming service stopped");
    }

    /// Returns true if `path` is a directory.
    pub async fn is_directory(&self, path: &Path) -> Result<bool> {
        self.ensure_known(path)?;
        let guard = self.locks.acquire(path, LockMode::Shared).await?;
        let result = self.tree.is_directory(path);
        guard.release().await?;
        result
    }

    /// Names of the files and subdirectories of a directory.
    pub async fn list(&self, path: &Path) -> Result<Vec<String>> {
        self.ensure_known(path)?;
        let guard = self.locks.acquire(path, LockMode::Shared).await?;
        let result = self.tree.list_children(path);
        guard.release().await?;
        result
    }

    /// Create an empty file on the storage server with the most capacity.
    ///
    /// Returns false if the path already exists.
    pub async fn create_file(&self, path: &Path) -> Result<bool> {
        self.create(path, EntryKind::File).await
    }

    /// Create a directory on the storage server with the most capacity.
    ///
    /// Returns false if the path already exists.
    pub async fn create_directory(&self, path: &Path) -> Result<bool> {
        self.create(path, EntryKind::Directory).await
    }

    async fn create(&self, path: &Path, kind: EntryKind) -> Result<bool> {
        let Some(parent) = path.parent() else {
            return Ok(false);
        };
        let guard = self.locks.acquire(path, LockMode::Exclusive).await?;
        let result = self.create_locked(path, &parent, kind).await;
        guard.release().await?;
        result
    }

    async fn create_locked(&self, path: &Path, parent: &Path, kind: EntryKind) -> Result<bool> {
        if !self.is_known(parent) || !matches!(self.tree.is_directory(parent), Ok(true)) {
            return Err(NamingError::NotFound(parent.clone()));
        }
        if self.tree.contains(path) {
            return Ok(false);
        }

        let target = self.registry.choose_placement_target()?;
        let created = match kind {
            EntryKind::File => target.command.create(path).await?,
            EntryKind::Directory => target.command.create_directory(path).await?,
        };
        if !created {
            debug!(%path, server = %target.id, "storage server reports entry exists");
            return Ok(false);
        }

        self.tree.insert(path, kind)?;
        self.registry.record_host(path, target.id)?;
        self.locks.seed_counters(vec![path.clone()])?;
        info!(%path, ?kind, server = %target.id, "created");
        Ok(true)
    }

    /// Delete a file or directory tree from every storage server hosting it.
    ///
    /// Stops at the first replica that fails. Replicas already deleted are
    /// not restored and the tree is left unchanged. Returns false if a
    /// replica reports nothing to delete, or for root.
    pub async fn delete(&self, path: &Path) -> Result<bool> {
        if path.is_root() {
            return Ok(false);
        }
        self.ensure_known(path)?;
        let guard = self.locks.acquire(path, LockMode::Exclusive).await?;
        let result = self.delete_locked(path).await;
        guard.release().await?;
        result
    }

    async fn delete_locked(&self, path: &Path) -> Result<bool> {
        if !self.tree.contains(path) {
            return Err(NamingError::NotFound(path.clone()));
        }
        let servers = self.registry.resolve_servers(path)?;
        if servers.is_empty() {
            error!(%path, "path in tree has no storage server");
            return Err(NamingError::InvalidState(format!(
                "{} has no hosting storage server",
                path
            )));
        }

        for server in &servers {
            match server.command.delete(path).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(%path, server = %server.id, "replica delete refused, aborting");
                    return Ok(false);
                }
                Err(e) => {
                    warn!(%path, server = %server.id, error = %e, "replica delete failed, aborting");
                    return Err(e.into());
                }
            }
        }

        self.tree.remove(path)?;
        self.registry.forget_subtree(path)?;
        info!(%path, replicas = servers.len(), "deleted");
        Ok(true)
    }

    /// Data handle of one storage server hosting `path`, chosen at random.
    pub async fn get_storage(&self, path: &Path) -> Result<Arc<dyn StorageHandle>> {
        self.ensure_known(path)?;
        let guard = self.locks.acquire(path, LockMode::Shared).await?;
        let result = self.pick_storage(path);
        guard.release().await?;
        result
    }

    fn pick_storage(&self, path: &Path) -> Result<Arc<dyn StorageHandle>> {
        self.tree.resolve(path)?;
        let servers = self.registry.resolve_servers(path)?;
        servers
            .choose(&mut rand::thread_rng())
            .map(|s| s.storage.clone())
            .ok_or_else(|| NamingError::NotFound(path.clone()))
    }

    /// Lock a path on behalf of a client. Waits for the grant.
    pub async fn lock(&self, path: &Path, mode: LockMode) -> Result<()> {
        self.ensure_known(path)?;
        self.locks.request(path, mode).await
    }

    /// Release a client lock taken with [`NamingService::lock`].
    pub async fn unlock(&self, path: &Path, mode: LockMode) -> Result<()> {
        self.locks.release(path, mode).await
    }

    /// Register a storage server and its inventory of files.
    ///
    /// Returns the files the server must delete locally because an earlier
    /// registrant already provides them, or because they clash with an
    /// existing directory.
    pub async fn register(
        &self,
        storage: Arc<dyn StorageHandle>,
        command: Arc<dyn CommandHandle>,
        capacity: u64,
        files: Vec<Path>,
    ) -> Result<Vec<Path>> {
        let server = self.registry.add_server(storage, command, capacity)?;

        let inventory: BTreeSet<Path> = files.into_iter().filter(|f| !f.is_root()).collect();
        let mut accepted = Vec::new();
        let mut duplicates = Vec::new();
        for file in inventory {
            match self.tree.insert(&file, EntryKind::File) {
                Ok(true) => {
                    self.registry.record_host(&file, server)?;
                    accepted.push(file);
                }
                Ok(false) | Err(NamingError::InvalidState(_)) => duplicates.push(file),
                Err(e) => return Err(e),
            }
        }

        self.locks.seed_counters(accepted.clone())?;
        info!(
            %server,
            capacity,
            accepted = accepted.len(),
            duplicates = duplicates.len(),
            "storage server registered"
        );
        Ok(duplicates)
    }

    /// Replace the advertised capacity of a registered server.
    pub fn update_capacity(&self, server: ServerId, capacity: u64) -> Result<()> {
        self.registry.update_capacity(server, capacity)?;
        debug!(%server, capacity, "capacity updated");
        Ok(())
    }

    /// Pick a server to receive a new replica of a hot path.
    ///
    /// Returns `None` if the path is gone, is a directory, or every server
    /// already hosts it.
    pub fn plan_replica(&self, item: &HotPathItem) -> Result<Option<ServerId>> {
        if !self.registry.is_hosted(&item.path) {
            return Ok(None);
        }
        match self.tree.resolve(&item.path) {
            Ok(EntryKind::File) => {}
            Ok(EntryKind::Directory) | Err(NamingError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        }
        Ok(self.registry.replica_candidate(&item.path)?.map(|s| s.id))
    }

    /// Record that `server` now holds a copy of `path`.
    ///
    /// Called by the out-of-band replicator once its copy finished, so that
    /// reads spread to the new replica and deletes reach it.
    pub async fn record_replica(&self, path: &Path, server: ServerId) -> Result<()> {
        self.ensure_known(path)?;
        self.registry.server(server)?;
        let guard = self.locks.acquire(path, LockMode::Exclusive).await?;
        let result = if self.tree.contains(path) {
            self.registry.record_host(path, server)
        } else {
            Err(NamingError::NotFound(path.clone()))
        };
        guard.release().await?;
        if result.is_ok() {
            info!(%path, %server, "replica recorded");
        }
        result
    }

    /// Ids of every server hosting `path`, in hosting order.
    pub fn replicas(&self, path: &Path) -> Result<Vec<ServerId>> {
        Ok(self
            .registry
            .resolve_servers(path)?
            .iter()
            .map(|s| s.id)
            .collect())
    }

    /// Data handle of a registered server.
    pub fn storage_of(&self, server: ServerId) -> Result<Arc<dyn StorageHandle>> {
        Ok(self.registry.server(server)?.storage)
    }

    /// Handle to the hot-path queue.
    pub fn replication(&self) -> &ReplicationHandle {
        &self.replication
    }

    /// Snapshot of the lock scheduler's state.
    pub async fn lock_state(&self) -> Result<LockState> {
        self.locks.snapshot().await
    }

    /// Number of registered storage servers.
    pub fn server_count(&self) -> usize {
        self.registry.server_count()
    }

    /// The configuration this service was started with.
    pub fn config(&self) -> &NamingConfig {
        &self.config
    }

    fn is_known(&self, path: &Path) -> bool {
        path.is_root() || self.registry.is_hosted(path)
    }

    fn ensure_known(&self, path: &Path) -> Result<()> {
        if self.is_known(path) {
            Ok(())
        } else {
            Err(NamingError::NotFound(path.clone()))
        }
    }
}
