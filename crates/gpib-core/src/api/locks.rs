//! Per-instrument mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::models::InstrumentId;

type LockTable = Arc<Mutex<HashMap<InstrumentId, Arc<tokio::sync::Mutex<()>>>>>;

/// One async lock per instrument id.
///
/// Entries exist only while some caller holds or waits on the lock, so
/// requests for unknown or deleted ids leave nothing behind.
#[derive(Default)]
pub(crate) struct IdLocks {
    locks: LockTable,
}

/// Exclusive access to one id. Dropping it frees the table entry when no
/// other caller is queued on the same lock.
pub(crate) struct IdGuard {
    id: InstrumentId,
    table: LockTable,
    lock: Arc<tokio::sync::Mutex<()>>,
    _guard: OwnedMutexGuard<()>,
}

impl IdLocks {
    /// Wait for exclusive access to `id`.
    pub(crate) async fn acquire(&self, id: InstrumentId) -> IdGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(id).or_default())
        };
        let guard = Arc::clone(&lock).lock_owned().await;
        IdGuard {
            id,
            table: Arc::clone(&self.locks),
            lock,
            _guard: guard,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for IdGuard {
    fn drop(&mut self) {
        let mut locks = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // Held by the table, `self.lock` and the owned guard: nobody else waits.
        let idle = locks
            .get(&self.id)
            .is_some_and(|entry| Arc::ptr_eq(entry, &self.lock))
            && Arc::strong_count(&self.lock) == 3;
        if idle {
            locks.remove(&self.id);
        }
    }
}
