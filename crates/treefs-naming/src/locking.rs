//! Hierarchical path locking.
//!
//! Locks are granted by a single scheduler task that owns the global wait
//! queue and is the only mutator of [`LockState`]. Locking a path in any
//! mode also takes a shared intention entry on every ancestor, so an
//! exclusive lock on a directory waits for all in-use descendants and a
//! descendant waits for an exclusively locked ancestor.
//!
//! Grants are strictly FIFO over one queue shared by all paths: a blocked
//! head request holds back every request behind it, even on unrelated paths.
//! The scheduler re-examines the head only when a message arrives (a new
//! request, a release, or a query), never by polling.
//!
//! [`LockManager::acquire`] hands out a [`PathLockGuard`] that exists from
//! the moment the request is queued; dropping it withdraws the request or
//! releases the grant.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::path::Path;
use crate::types::{HotPathItem, LockMode, NamingError, Result};

/// Lock bookkeeping owned by the scheduler.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LockState {
    /// Paths currently held exclusively.
    pub exclusive_held: HashSet<Path>,
    /// Paths held shared, by number of holders.
    pub shared_held: HashMap<Path, usize>,
    /// Ancestors of held paths, by number of intention entries.
    pub intention_held: HashMap<Path, usize>,
    /// Shared-grant counters. Never reset while the service runs.
    pub access_counts: HashMap<Path, u64>,
}

impl LockState {
    /// Returns true if `path` is held in either mode.
    pub fn is_locked(&self, path: &Path) -> bool {
        self.exclusive_held.contains(path) || self.shared_held.contains_key(path)
    }

    /// Returns true if `path` or a descendant of it is held.
    pub fn is_in_use(&self, path: &Path) -> bool {
        self.is_locked(path) || self.intention_held.contains_key(path)
    }

    /// Shared-grant counter for `path` (zero if never seen).
    pub fn access_count(&self, path: &Path) -> u64 {
        self.access_counts.get(path).copied().unwrap_or(0)
    }

    fn can_grant(&self, path: &Path, mode: LockMode) -> bool {
        let ancestors_free = path
            .ancestors()
            .iter()
            .all(|a| !self.exclusive_held.contains(a));
        let target_free = match mode {
            LockMode::Exclusive => !self.is_in_use(path),
            LockMode::Shared => !self.exclusive_held.contains(path),
        };
        ancestors_free && target_free
    }

    fn grant(&mut self, path: &Path, mode: LockMode) {
        for ancestor in path.ancestors() {
            *self.intention_held.entry(ancestor).or_insert(0) += 1;
        }
        match mode {
            LockMode::Exclusive => {
                self.exclusive_held.insert(path.clone());
            }
            LockMode::Shared => {
                *self.shared_held.entry(path.clone()).or_insert(0) += 1;
            }
        }
    }

    /// Validates the whole release before mutating, so misuse leaves the
    /// state unchanged.
    fn release(&mut self, path: &Path, mode: LockMode) -> Result<()> {
        let held = match mode {
            LockMode::Exclusive => self.exclusive_held.contains(path),
            LockMode::Shared => self.shared_held.contains_key(path),
        };
        if !held {
            return Err(NamingError::InvalidState(format!(
                "{} is not locked {}",
                path, mode
            )));
        }
        let ancestors = path.ancestors();
        if let Some(missing) = ancestors
            .iter()
            .find(|a| !self.intention_held.contains_key(*a))
        {
            return Err(NamingError::InvalidState(format!(
                "ancestor {} of {} holds no intention lock",
                missing, path
            )));
        }

        match mode {
            LockMode::Exclusive => {
                self.exclusive_held.remove(path);
            }
            LockMode::Shared => decrement(&mut self.shared_held, path),
        }
        for ancestor in &ancestors {
            decrement(&mut self.intention_held, ancestor);
        }
        Ok(())
    }
}

fn decrement(holders: &mut HashMap<Path, usize>, path: &Path) {
    if let Some(count) = holders.get_mut(path) {
        *count -= 1;
        if *count == 0 {
            holders.remove(path);
        }
    }
}

/// A queued lock request awaiting its grant.
#[derive(Debug)]
pub struct PendingLockRequest {
    /// Identifies the request and, once granted, the lock it holds.
    pub id: u64,
    /// Target path.
    pub path: Path,
    /// Requested mode.
    pub mode: LockMode,
    completion: oneshot::Sender<()>,
}

enum SchedulerMsg {
    Acquire(PendingLockRequest),
    Release {
        path: Path,
        mode: LockMode,
        reply: oneshot::Sender<Result<()>>,
    },
    ReleaseGuard {
        id: u64,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Detach(u64),
    Seed(Vec<Path>),
    Snapshot(oneshot::Sender<LockState>),
    Shutdown,
}

/// A path lock held for the lifetime of the guard.
///
/// The guard exists from the moment the request is queued. Dropping it,
/// granted or not, withdraws the request or releases the lock, so a caller
/// cancelled at any await point never leaves a path held.
#[must_use = "dropping the guard releases the lock"]
pub struct PathLockGuard {
    id: u64,
    path: Path,
    mode: LockMode,
    sender: mpsc::UnboundedSender<SchedulerMsg>,
    armed: bool,
}

impl PathLockGuard {
    /// Locked path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mode the path is locked in.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Releases the lock and waits for the scheduler to confirm.
    pub async fn release(mut self) -> Result<()> {
        self.armed = false;
        let (reply, result) = oneshot::channel();
        self.sender
            .send(SchedulerMsg::ReleaseGuard {
                id: self.id,
                reply: Some(reply),
            })
            .map_err(|_| NamingError::SchedulerStopped)?;
        result.await.map_err(|_| NamingError::SchedulerStopped)?
    }

    /// Keeps the lock past the guard; it must then be released by path
    /// through [`LockManager::release`].
    pub fn detach(mut self) {
        self.armed = false;
        let _ = self.sender.send(SchedulerMsg::Detach(self.id));
    }
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.sender.send(SchedulerMsg::ReleaseGuard {
                id: self.id,
                reply: None,
            });
        }
    }
}

impl std::fmt::Debug for PathLockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLockGuard")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Handle to the lock scheduler.
pub struct LockManager {
    sender: mpsc::UnboundedSender<SchedulerMsg>,
    next_id: AtomicU64,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Spawns the scheduler task.
    ///
    /// Every shared grant whose counter becomes a multiple of
    /// `replication_threshold` sends one [`HotPathItem`] on `hot_paths`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(replication_threshold: u64, hot_paths: mpsc::UnboundedSender<HotPathItem>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler = LockScheduler {
            state: LockState::default(),
            waiting: VecDeque::new(),
            guarded: HashMap::new(),
            replication_threshold: replication_threshold.max(1),
            hot_paths,
        };
        let task = tokio::spawn(scheduler.run(receiver));
        Self {
            sender,
            next_id: AtomicU64::new(1),
            task: std::sync::Mutex::new(Some(task)),
        }
    }

    /// Waits until `path` is locked in `mode` and returns the guard holding it.
    ///
    /// The request joins the queue on the first poll, before the future can
    /// suspend, so the order in which callers start waiting is grant order.
    pub async fn acquire(&self, path: &Path, mode: LockMode) -> Result<PathLockGuard> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (completion, granted) = oneshot::channel();
        self.sender
            .send(SchedulerMsg::Acquire(PendingLockRequest {
                id,
                path: path.clone(),
                mode,
                completion,
            }))
            .map_err(|_| NamingError::SchedulerStopped)?;

        let guard = PathLockGuard {
            id,
            path: path.clone(),
            mode,
            sender: self.sender.clone(),
            armed: true,
        };
        granted.await.map_err(|_| NamingError::SchedulerStopped)?;
        Ok(guard)
    }

    /// Waits until `path` is locked in `mode`. The lock is held until a
    /// matching [`LockManager::release`].
    pub async fn request(&self, path: &Path, mode: LockMode) -> Result<()> {
        self.acquire(path, mode).await?.detach();
        Ok(())
    }

    /// Releases a lock previously granted by [`LockManager::request`].
    pub async fn release(&self, path: &Path, mode: LockMode) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(SchedulerMsg::Release {
                path: path.clone(),
                mode,
                reply,
            })
            .map_err(|_| NamingError::SchedulerStopped)?;
        result.await.map_err(|_| NamingError::SchedulerStopped)?
    }

    /// Creates zeroed access counters for paths that have none.
    pub fn seed_counters(&self, paths: Vec<Path>) -> Result<()> {
        self.sender
            .send(SchedulerMsg::Seed(paths))
            .map_err(|_| NamingError::SchedulerStopped)
    }

    /// Copy of the current lock state.
    pub async fn snapshot(&self) -> Result<LockState> {
        let (reply, result) = oneshot::channel();
        self.sender
            .send(SchedulerMsg::Snapshot(reply))
            .map_err(|_| NamingError::SchedulerStopped)?;
        result.await.map_err(|_| NamingError::SchedulerStopped)
    }

    /// Shared-grant counter for `path`.
    pub async fn access_count(&self, path: &Path) -> Result<u64> {
        Ok(self.snapshot().await?.access_count(path))
    }

    /// Stops the scheduler. Waiting and later requests fail with
    /// `SchedulerStopped`.
    pub async fn shutdown(&self) {
        let _ = self.sender.send(SchedulerMsg::Shutdown);
        let task = self.task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    /// Returns true while the scheduler task is accepting messages.
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

struct LockScheduler {
    state: LockState,
    waiting: VecDeque<PendingLockRequest>,
    /// Delivered grants still owned by a live guard.
    guarded: HashMap<u64, (Path, LockMode)>,
    replication_threshold: u64,
    hot_paths: mpsc::UnboundedSender<HotPathItem>,
}

impl LockScheduler {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SchedulerMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                SchedulerMsg::Acquire(request) => self.waiting.push_back(request),
                SchedulerMsg::Release { path, mode, reply } => {
                    let result = self.release(&path, mode);
                    let _ = reply.send(result);
                }
                SchedulerMsg::ReleaseGuard { id, reply } => {
                    let result = self.release_guard(id);
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                SchedulerMsg::Detach(id) => {
                    self.guarded.remove(&id);
                }
                SchedulerMsg::Seed(paths) => {
                    for path in paths {
                        self.state.access_counts.entry(path).or_insert(0);
                    }
                }
                SchedulerMsg::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
                SchedulerMsg::Shutdown => break,
            }
            self.grant_ready();
        }
        debug!(pending = self.waiting.len(), "lock scheduler stopped");
        // Dropping the queue drops every completion sender; waiters see SchedulerStopped.
    }

    fn release(&mut self, path: &Path, mode: LockMode) -> Result<()> {
        let result = self.state.release(path, mode);
        match &result {
            Ok(()) => debug!(%path, %mode, "lock released"),
            Err(e) => warn!(%path, %mode, error = %e, "unbalanced unlock"),
        }
        result
    }

    /// Withdraws a queued request, or releases the grant a guard owns.
    /// Ids already rolled back or detached are ignored.
    fn release_guard(&mut self, id: u64) -> Result<()> {
        if let Some((path, mode)) = self.guarded.remove(&id) {
            return self.release(&path, mode);
        }
        if let Some(index) = self.waiting.iter().position(|r| r.id == id) {
            if let Some(request) = self.waiting.remove(index) {
                debug!(path = %request.path, "withdrawing cancelled lock request");
            }
        }
        Ok(())
    }

    /// Grants queued requests in order until the head cannot be granted.
    fn grant_ready(&mut self) {
        while let Some(head) = self.waiting.front() {
            if head.completion.is_closed() {
                debug!(path = %head.path, "dropping abandoned lock request");
                self.waiting.pop_front();
                continue;
            }
            if !self.state.can_grant(&head.path, head.mode) {
                break;
            }
            let Some(request) = self.waiting.pop_front() else {
                break;
            };

            self.state.grant(&request.path, request.mode);
            if request.completion.send(()).is_err() {
                // The caller went away between the check and the grant.
                let _ = self.state.release(&request.path, request.mode);
                continue;
            }
            debug!(path = %request.path, mode = %request.mode, "lock granted");
            self.guarded
                .insert(request.id, (request.path.clone(), request.mode));

            if request.mode == LockMode::Shared {
                self.count_access(request.path);
            }
        }
    }

    fn count_access(&mut self, path: Path) {
        let count = self.state.access_counts.entry(path.clone()).or_insert(0);
        *count += 1;
        let access_count = *count;
        if access_count % self.replication_threshold == 0 {
            debug!(%path, access_count, "hot path");
            if self
                .hot_paths
                .send(HotPathItem { path, access_count })
                .is_err()
            {
                warn!("replication trigger stopped, hot path discarded");
            }
        }
    }
}
