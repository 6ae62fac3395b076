use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::store::MetadataLockView;

#[derive(Debug, Clone)]
struct HeldLock {
    table_ids: Vec<i64>,
    version: i64,
}

/// Metadata locks taken by the local transactions of one node.
#[derive(Debug, Default)]
pub struct MemoryLockRegistry {
    held: Mutex<HashMap<u64, HeldLock>>,
}

impl MemoryLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that transaction `txn_id` uses `table_ids` at schema `version`.
    pub fn begin(&self, txn_id: u64, table_ids: &[i64], version: i64) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                txn_id,
                HeldLock {
                    table_ids: table_ids.to_vec(),
                    version,
                },
            );
    }

    pub fn release(&self, txn_id: u64) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&txn_id);
    }
}

impl MetadataLockView for MemoryLockRegistry {
    fn holds_stale_lock(&self, table_ids: &[i64], version: i64) -> bool {
        let held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.values().any(|lock| {
            lock.version < version && lock.table_ids.iter().any(|id| table_ids.contains(id))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_lock_detection() {
        let locks = MemoryLockRegistry::new();
        locks.begin(1, &[10, 11], 4);
        assert!(locks.holds_stale_lock(&[11], 5));
        assert!(!locks.holds_stale_lock(&[11], 4));
        assert!(!locks.holds_stale_lock(&[12], 5));
        locks.release(1);
        assert!(!locks.holds_stale_lock(&[11], 5));
    }
}
