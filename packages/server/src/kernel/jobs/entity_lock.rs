//! Advisory per-entity locks.
//!
//! When enabled, a worker holds the lock for a job's `entity_id` while its
//! handler runs, so two jobs on the same conflict never execute at once.
//! Jobs on different entities are unaffected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

#[derive(Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `entity_id`.
    pub async fn acquire(self: &Arc<Self>, entity_id: &str) -> EntityGuard {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(entity_id.to_string())
            .or_default()
            .clone();

        let guard = lock.lock_owned().await;
        EntityGuard {
            locks: Arc::clone(self),
            entity_id: entity_id.to_string(),
            guard: Some(guard),
        }
    }

    /// Entities with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases the entity lock on drop and forgets entities nobody waits on.
pub struct EntityGuard {
    locks: Arc<EntityLocks>,
    entity_id: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for EntityGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        let mut locks = self.locks.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Only the map's own reference left: no holder, no waiter.
        if locks
            .get(&self.entity_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.entity_id);
        }
    }
}
