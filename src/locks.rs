use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Per-height lock manager. Holding the guard for a height excludes every
/// other holder of the same height and nothing else.
#[derive(Default)]
pub struct HeightLocks {
    held: Mutex<HashSet<u32>>,
    released: Condvar,
}

impl HeightLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until no one else holds `height`.
    pub fn acquire(&self, height: u32) -> HeightGuard<'_> {
        let mut held = self.held();
        while held.contains(&height) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.insert(height);
        HeightGuard {
            locks: self,
            height,
        }
    }

    pub fn is_held(&self, height: u32) -> bool {
        self.held().contains(&height)
    }

    // the set is never left half-updated, so a poisoned lock is still usable
    fn held(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct HeightGuard<'a> {
    locks: &'a HeightLocks,
    height: u32,
}

impl Drop for HeightGuard<'_> {
    fn drop(&mut self) {
        self.locks.held().remove(&self.height);
        self.locks.released.notify_all();
    }
}
