//! Per-hash mutual exclusion for admission work
//!
//! Admission reads the previous ledger counter, rewrites the row and clears the
//! queue. Two workers doing that for the same hash at once could both read the
//! same counter or delete each other's fresh row, so every operation on a hash
//! holds its entry in this table for the duration.

use crate::transaction::TxHash;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

#[derive(Default)]
pub struct HashLockTable {
    held: Mutex<HashSet<TxHash>>,
    released: Condvar,
}

/// Held lock on one hash; released on drop.
pub struct HashLockGuard<'a> {
    table: &'a HashLockTable,
    hash: TxHash,
}

impl HashLockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no other guard exists for `hash`.
    pub fn acquire(&self, hash: TxHash) -> HashLockGuard<'_> {
        let mut held = self.held.lock();
        while held.contains(&hash) {
            self.released.wait(&mut held);
        }
        held.insert(hash);
        HashLockGuard { table: self, hash }
    }

    #[cfg(test)]
    fn try_acquire(&self, hash: TxHash) -> Option<HashLockGuard<'_>> {
        let mut held = self.held.lock();
        if !held.insert(hash) {
            return None;
        }
        Some(HashLockGuard { table: self, hash })
    }

    #[cfg(test)]
    fn is_locked(&self, hash: &TxHash) -> bool {
        self.held.lock().contains(hash)
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl Drop for HashLockGuard<'_> {
    fn drop(&mut self) {
        self.table.held.lock().remove(&self.hash);
        self.table.released.notify_all();
    }
}
