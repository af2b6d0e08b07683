//! Per-key async mutual exclusion.
//!
//! Cart mutations are read-modify-write sequences against storage, so two
//! concurrent additions for the same cart must not interleave. [`KeyedLocks`]
//! hands out one async mutex per key; distinct keys never contend.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Entries without holders are dropped once the registry reaches this size.
const PRUNE_THRESHOLD: usize = 256;

/// A registry of async mutexes keyed by `K`.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `key` is free and returns its guard.
    ///
    /// The lock is released when the guard is dropped.
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
