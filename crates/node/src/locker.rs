//! Lock manager.
//!
//! - [`NodeLocker`]: one exclusive mutation lock per node id, acquired with a
//!   bounded wait.
//! - [`FileLocker`] / [`IndexLocker`]: advisory "in progress" markers with a
//!   creation time and an optional error, polled by clients and swept by age.
//!
//! One [`LockManager`] is constructed per process (or per test) and shared
//! through an `Arc`.

use crate::error::{NodeError, NodeResult};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shoal_core::config::LockConfig;
use shoal_core::{LockInfo, NodeId};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct NodeSlot {
    semaphore: Arc<Semaphore>,
    held_since: Mutex<Option<OffsetDateTime>>,
    last_used: Mutex<Instant>,
}

impl NodeSlot {
    fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
            held_since: Mutex::new(None),
            last_used: Mutex::new(Instant::now()),
        }
    }
}

/// Exclusive per-node mutation locks.
pub struct NodeLocker {
    slots: DashMap<NodeId, Arc<NodeSlot>>,
    timeout: Duration,
}

/// Held node lock, released on drop.
pub struct NodeGuard {
    id: NodeId,
    slot: Arc<NodeSlot>,
    _permit: OwnedSemaphorePermit,
}

impl NodeGuard {
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl fmt::Debug for NodeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeGuard").field("id", &self.id).finish()
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        *lock_unpoisoned(&self.slot.held_since) = None;
        *lock_unpoisoned(&self.slot.last_used) = Instant::now();
    }
}

impl NodeLocker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            timeout,
        }
    }

    /// Wait up to the configured timeout for the lock on `id`.
    pub async fn lock(&self, id: NodeId) -> NodeResult<NodeGuard> {
        // Clone the slot out so the map shard is not held across the wait.
        let slot = self
            .slots
            .entry(id)
            .or_insert_with(|| Arc::new(NodeSlot::new()))
            .clone();

        let permit = tokio::time::timeout(self.timeout, slot.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| NodeError::LockTimeout(id))?
            .map_err(|_| NodeError::Internal(format!("lock for node {id} was closed")))?;

        *lock_unpoisoned(&slot.held_since) = Some(OffsetDateTime::now_utc());
        *lock_unpoisoned(&slot.last_used) = Instant::now();
        Ok(NodeGuard {
            id,
            slot,
            _permit: permit,
        })
    }

    /// Nodes currently locked, with the time each lock was taken.
    pub fn locked(&self) -> Vec<(NodeId, OffsetDateTime)> {
        let mut out: Vec<_> = self
            .slots
            .iter()
            .filter_map(|entry| {
                let since = *lock_unpoisoned(&entry.value().held_since);
                since.map(|since| (*entry.key(), since))
            })
            .collect();
        out.sort_by_key(|(_, since)| *since);
        out
    }

    /// Drop idle slots unused for longer than `max_age`. Returns how many were removed.
    pub fn remove_old(&self, max_age: Duration) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| {
            // A clone outside the map means someone is waiting on or holding it.
            let idle = Arc::strong_count(slot) == 1 && slot.semaphore.available_permits() == 1;
            !(idle && lock_unpoisoned(&slot.last_used).elapsed() >= max_age)
        });
        before.saturating_sub(self.slots.len())
    }
}

/// Advisory in-progress markers keyed by `K`.
pub struct AdvisoryLocker<K> {
    entries: DashMap<K, LockInfo>,
}

impl<K> Default for AdvisoryLocker<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K> AdvisoryLocker<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fresh marker.
    ///
    /// A marker left behind by a failed job is replaced; a live one is
    /// returned as the error.
    pub fn try_add(&self, key: K) -> Result<(), LockInfo> {
        match self.entries.entry(key) {
            Entry::Occupied(mut entry) => {
                if entry.get().error.is_none() {
                    return Err(entry.get().clone());
                }
                entry.insert(LockInfo::new());
                Ok(())
            }
            Entry::Vacant(entry) => {
                entry.insert(LockInfo::new());
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<LockInfo> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Whether a marker without an error is present.
    pub fn is_active(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.value().error.is_none())
    }

    pub fn remove(&self, key: &K) -> Option<LockInfo> {
        self.entries.remove(key).map(|(_, info)| info)
    }

    /// Record a failure on the marker so pollers can see it.
    pub fn set_error(&self, key: &K, error: impl Into<String>) {
        let error = error.into();
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => entry.get_mut().error = Some(error),
            Entry::Vacant(entry) => {
                entry.insert(LockInfo {
                    created_on: OffsetDateTime::now_utc(),
                    error: Some(error),
                });
            }
        }
    }

    pub fn all(&self) -> Vec<(K, LockInfo)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop markers created more than `max_age` ago. Returns how many were removed.
    pub fn remove_old(&self, max_age: Duration) -> usize {
        let now = OffsetDateTime::now_utc();
        let before = self.entries.len();
        self.entries
            .retain(|_, info| (now - info.created_on).unsigned_abs() <= max_age);
        before.saturating_sub(self.entries.len())
    }
}

/// Key of an index lock.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey {
    pub node: NodeId,
    pub index: String,
}

impl IndexKey {
    pub fn new(node: NodeId, index: impl Into<String>) -> Self {
        Self {
            node,
            index: index.into(),
        }
    }
}

pub type FileLocker = AdvisoryLocker<NodeId>;
pub type IndexLocker = AdvisoryLocker<IndexKey>;

impl IndexLocker {
    /// Index locks of one node, by index name.
    pub fn for_node(&self, node: &NodeId) -> Vec<(String, LockInfo)> {
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().node == *node)
            .map(|entry| (entry.key().index.clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

/// Counts removed by one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub nodes: usize,
    pub files: usize,
    pub indexes: usize,
}

/// The node, file and index lockers.
pub struct LockManager {
    pub nodes: NodeLocker,
    pub files: FileLocker,
    pub indexes: IndexLocker,
}

impl LockManager {
    pub fn new(node_lock_timeout: Duration) -> Self {
        Self {
            nodes: NodeLocker::new(node_lock_timeout),
            files: FileLocker::new(),
            indexes: IndexLocker::new(),
        }
    }

    pub fn from_config(config: &LockConfig) -> Self {
        Self::new(config.node_lock_timeout())
    }

    /// Age-based sweep of all three lockers.
    pub fn sweep(&self, config: &LockConfig) -> SweepStats {
        const HOUR: u64 = 3600;
        let stats = SweepStats {
            nodes: self
                .nodes
                .remove_old(Duration::from_secs(config.node_max_age_hours * HOUR)),
            files: self
                .files
                .remove_old(Duration::from_secs(config.file_max_age_hours * HOUR)),
            indexes: self
                .indexes
                .remove_old(Duration::from_secs(config.index_max_age_hours * HOUR)),
        };
        if stats.files > 0 || stats.indexes > 0 {
            warn!(
                files = stats.files,
                indexes = stats.indexes,
                "removed stale advisory locks"
            );
        }
        debug!(nodes = stats.nodes, "swept idle node lock slots");
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_node_lock_is_exclusive() {
        let locker = Arc::new(NodeLocker::new(Duration::from_secs(5)));
        let id = NodeId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locker = locker.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locker.lock(id).await.unwrap();
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locker.locked().is_empty());
    }

    #[tokio::test]
    async fn test_node_lock_times_out() {
        let locker = NodeLocker::new(Duration::from_millis(50));
        let id = NodeId::new();
        let guard = locker.lock(id).await.unwrap();
        assert_eq!(locker.locked().len(), 1);

        match locker.lock(id).await {
            Err(NodeError::LockTimeout(locked)) => assert_eq!(locked, id),
            other => panic!("unexpected result: {other:?}"),
        }

        drop(guard);
        assert!(locker.lock(id).await.is_ok());
        // Other ids are independent.
        assert!(locker.lock(NodeId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_old_keeps_held_slots() {
        let locker = NodeLocker::new(Duration::from_secs(1));
        let held = NodeId::new();
        let idle = NodeId::new();
        let _guard = locker.lock(held).await.unwrap();
        drop(locker.lock(idle).await.unwrap());

        assert_eq!(locker.remove_old(Duration::ZERO), 1);
        assert_eq!(locker.locked().len(), 1);
        assert_eq!(locker.locked()[0].0, held);
    }

    #[test]
    fn test_advisory_lock_lifecycle() {
        let locks = FileLocker::new();
        let id = NodeId::new();
        assert!(locks.try_add(id).is_ok());
        assert!(locks.try_add(id).is_err());
        assert!(locks.is_active(&id));

        locks.set_error(&id, "index is empty");
        assert!(!locks.is_active(&id));
        assert_eq!(locks.get(&id).unwrap().error.as_deref(), Some("index is empty"));

        // A failed marker may be replaced by a retry.
        assert!(locks.try_add(id).is_ok());
        assert!(locks.get(&id).unwrap().error.is_none());

        assert!(locks.remove(&id).is_some());
        assert!(locks.get(&id).is_none());
    }

    #[test]
    fn test_advisory_remove_old() {
        let locks = IndexLocker::new();
        let id = NodeId::new();
        locks.try_add(IndexKey::new(id, "record")).unwrap();
        locks.try_add(IndexKey::new(id, "line")).unwrap();
        locks
            .entries
            .get_mut(&IndexKey::new(id, "line"))
            .unwrap()
            .created_on -= time::Duration::hours(7);

        assert_eq!(locks.remove_old(Duration::from_secs(6 * 3600)), 1);
        let remaining = locks.for_node(&id);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].0, "record");
    }

    #[test]
    fn test_sweep_uses_configured_ages() {
        let manager = LockManager::from_config(&LockConfig::default());
        let id = NodeId::new();
        manager.files.try_add(id).unwrap();
        manager.files.entries.get_mut(&id).unwrap().created_on -= time::Duration::hours(7);
        manager.indexes.try_add(IndexKey::new(id, "record")).unwrap();

        let stats = manager.sweep(&LockConfig::default());
        assert_eq!(stats.files, 1);
        assert_eq!(stats.indexes, 0);
    }
}
