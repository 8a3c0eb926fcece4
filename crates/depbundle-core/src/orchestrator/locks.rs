//! Keyed async locks for bundles and fingerprints.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// What to do when a key is already held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockPolicy {
    /// Queue behind the current holder.
    #[default]
    Wait,
    /// Give up immediately.
    Reject,
}

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

fn lock_slots(slots: &Slots) -> std::sync::MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
    match slots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Map of string keys to async mutexes.
///
/// A key's mutex exists only while someone holds or waits for it; the last
/// [`KeyedGuard`] to drop removes it.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Slots,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &str) -> Arc<AsyncMutex<()>> {
        lock_slots(&self.slots)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire `key`. Returns `None` only under [`LockPolicy::Reject`] when
    /// the key is held.
    pub async fn acquire(&self, key: &str, policy: LockPolicy) -> Option<KeyedGuard> {
        let slot = self.slot(key);
        let guard = match policy {
            LockPolicy::Wait => slot.lock_owned().await,
            LockPolicy::Reject => slot.try_lock_owned().ok()?,
        };
        Some(KeyedGuard {
            guard: Some(guard),
            key: key.to_string(),
            slots: self.slots.clone(),
        })
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        lock_slots(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds one key of a [`KeyedLocks`] until dropped.
#[derive(Debug)]
pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    slots: Slots,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        // release first so our own reference no longer counts
        self.guard.take();
        let mut slots = lock_slots(&self.slots);
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}
