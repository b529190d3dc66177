//! Per-key async mutual exclusion.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A set of async mutexes created on first use and dropped once idle.
///
/// Holders of different keys never contend. Waiters on the same key are
/// served in arrival order, because [`tokio::sync::Mutex`] is fair.
#[derive(Debug)]
pub struct KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Clone for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            locks: self.locks.clone(),
        }
    }
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> KeyedMutexGuard<K> {
        // Clone the Arc out so the shard lock is released before awaiting.
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedMutexGuard {
            key: key.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys with a live mutex (held or awaited).
    pub fn active_keys(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one key; released on drop.
pub struct KeyedMutexGuard<K>
where
    K: Eq + Hash + Clone,
{
    key: K,
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyedMutexGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // Unlock first so the guard's own Arc is gone when counting holders.
        drop(self.guard.take());
        // The map holds one reference; any other means a waiter or holder.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
