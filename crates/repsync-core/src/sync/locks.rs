//! In-flight pass registry
//!
//! At most one pass per `(table, user)` runs at a time. The mutex only guards
//! the set itself and is never held across an `.await`.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::SyncTable;

type PassKey = (SyncTable, String);

/// Shared set of `(table, user)` pairs with a pass in flight
#[derive(Debug, Clone, Default)]
pub struct SyncLocks {
    active: Arc<Mutex<HashSet<PassKey>>>,
}

impl SyncLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a pair; `None` when a pass for it is already running
    pub fn try_acquire(&self, table: SyncTable, user_id: &str) -> Option<SyncGuard> {
        let key = (table, user_id.to_string());
        let inserted = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());

        inserted.then(|| SyncGuard {
            active: Arc::clone(&self.active),
            key,
        })
    }

    pub fn is_running(&self, table: SyncTable, user_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(table, user_id.to_string()))
    }
}

/// Releases its pair when dropped, including on early return or panic
#[derive(Debug)]
pub struct SyncGuard {
    active: Arc<Mutex<HashSet<PassKey>>>,
    key: PassKey,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
