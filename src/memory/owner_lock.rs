//! Per-owner write serialization.
//!
//! Writers for the same owner queue behind one async mutex; different owners
//! never contend. The table itself is guarded by a std mutex held only to look
//! up or insert an entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `owner`.
    pub async fn lock(&self, owner: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(owner.to_string()).or_default())
        };
        entry.lock_owned().await
    }

    /// Drop the entry for `owner` if nobody holds or waits on it.
    pub fn release(&self, owner: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(owner)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(owner);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
