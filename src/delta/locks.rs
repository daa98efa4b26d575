//! Per-key single-flight locking
//!
//! A fetch cycle holds its cache key's lock from the first cache read to the
//! final knowledge write, so concurrent cycles for one key run back to back
//! and the later one sees the earlier one's result. Distinct keys never
//! contend. Registry slots are dropped once nobody holds or awaits them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    /// Callers holding or awaiting `lock`
    users: usize,
}

#[derive(Debug, Default)]
pub(crate) struct KeyedLocks {
    slots: Mutex<HashMap<String, Slot>>,
}

pub(crate) struct KeyGuard<'a> {
    registry: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.to_string()).or_insert_with(|| Slot {
                lock: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            slot.lock.clone()
        };

        // Claim is registered before waiting, so a cancelled wait still releases it
        let mut claim = KeyGuard {
            registry: self,
            key: key.to_string(),
            guard: None,
        };
        claim.guard = Some(lock.lock_owned().await);
        claim
    }

    /// Number of keys currently held or awaited
    #[cfg(test)]
    pub fn active_keys(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut slots = self.registry.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.users = slot.users.saturating_sub(1);
            if slot.users == 0 {
                slots.remove(&self.key);
            }
        }
    }
}
