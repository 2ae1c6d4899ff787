//! Access-triggered replication queue.
//!
//! The lock scheduler reports hot paths (every Nth shared grant on a path)
//! over an unbounded channel so it never blocks on this module. A background
//! task moves them into a bounded pending queue that an out-of-band
//! replicator drains; when the queue is full the oldest item is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::types::{HotPathItem, NamingError, Result};

/// Counters published by the replication trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStats {
    /// Hot paths received from the lock scheduler.
    pub received: u64,
    /// Hot paths discarded because the pending queue was full.
    pub dropped: u64,
    /// Hot paths waiting for a replicator.
    pub pending: usize,
}

/// Handle to the replication trigger.
#[derive(Clone)]
pub struct ReplicationHandle {
    pending: Arc<Mutex<VecDeque<HotPathItem>>>,
    stats: watch::Receiver<ReplicationStats>,
}

impl ReplicationHandle {
    /// Removes and returns every pending hot path, oldest first.
    pub fn take_pending(&self) -> Result<Vec<HotPathItem>> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|e| NamingError::InvalidState(e.to_string()))?;
        Ok(pending.drain(..).collect())
    }

    /// Number of hot paths waiting.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Latest published stats.
    pub fn stats(&self) -> ReplicationStats {
        self.stats.borrow().clone()
    }

    /// Waits until the trigger has received at least `count` hot paths.
    pub async fn wait_for_received(&self, count: u64) -> Result<ReplicationStats> {
        let mut stats = self.stats.clone();
        let seen = stats
            .wait_for(|s| s.received >= count)
            .await
            .map_err(|_| NamingError::InvalidState("replication trigger stopped".to_string()))?;
        Ok(seen.clone())
    }
}

/// Background task feeding hot paths into the pending queue.
pub struct ReplicationTrigger {
    capacity: usize,
    pending: Arc<Mutex<VecDeque<HotPathItem>>>,
    stats_tx: watch::Sender<ReplicationStats>,
    stats: ReplicationStats,
}

impl ReplicationTrigger {
    /// Starts the trigger task reading from `hot_paths`.
    ///
    /// The task ends when every sender of `hot_paths` is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(capacity: usize, hot_paths: mpsc::UnboundedReceiver<HotPathItem>) -> ReplicationHandle {
        let pending = Arc::new(Mutex::new(VecDeque::new()));
        let (stats_tx, stats_rx) = watch::channel(ReplicationStats::default());

        let trigger = ReplicationTrigger {
            capacity: capacity.max(1),
            pending: pending.clone(),
            stats_tx,
            stats: ReplicationStats::default(),
        };
        tokio::spawn(trigger.run(hot_paths));

        ReplicationHandle {
            pending,
            stats: stats_rx,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<HotPathItem>) {
        while let Some(item) = rx.recv().await {
            self.enqueue(item);
            let _ = self.stats_tx.send(self.stats.clone());
        }
        debug!("replication trigger stopped");
    }

    fn enqueue(&mut self, item: HotPathItem) {
        self.stats.received += 1;
        let Ok(mut pending) = self.pending.lock() else {
            warn!(path = %item.path, "replication queue poisoned, hot path discarded");
            self.stats.dropped += 1;
            return;
        };
        if pending.len() >= self.capacity {
            if let Some(evicted) = pending.pop_front() {
                warn!(path = %evicted.path, "replication queue full, dropping oldest hot path");
                self.stats.dropped += 1;
            }
        }
        debug!(path = %item.path, access_count = item.access_count, "queued for replication");
        pending.push_back(item);
        self.stats.pending = pending.len();
    }
}
