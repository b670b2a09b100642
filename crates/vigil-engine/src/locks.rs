use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use vigil_core::ResourceKind;

type LockKey = (ResourceKind, String);
type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

/// Per-resource async locks.
///
/// Holding the guard for `(kind, identifier)` makes the holder the only writer
/// of that resource's entry and appeal records. Reads never lock. An entry
/// lives only while someone holds or waits on it.
#[derive(Clone, Default)]
pub struct KeyLocks {
    locks: Arc<LockTable>,
}

/// Exclusive access to one resource; releasing it drops the table entry
/// unless another task is already waiting.
pub struct KeyGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    locks: Arc<LockTable>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Unlock first: a waiter that cloned the mutex keeps the entry alive.
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, m| Arc::strong_count(m) == 1);
    }
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for one resource.
    pub async fn lock(&self, kind: ResourceKind, identifier: &str) -> KeyGuard {
        let key = (kind, identifier.to_string());
        // Clone the Arc out so the map shard is not held across the await.
        let mutex = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyGuard {
            guard: Some(mutex.lock_owned().await),
            key,
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
