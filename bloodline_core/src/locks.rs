//! Per-key mutual exclusion.
//!
//! At most one mutation runs per aggregate key (an inventory record, a
//! request, a donor); different keys proceed in parallel. Entries live only
//! while some caller holds or waits for them.
//!
//! Locks only cover this process. Writers in other processes are caught by
//! the ledger's prior-state checks instead; [`retry_rejected`] reruns an
//! operation whose commit lost such a race.

use crate::ledger::LedgerError;
use crate::{Error, Result};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

/// Runs of an operation before a rejected commit is returned to the caller
pub const COMMIT_ATTEMPTS: usize = 8;

/// Lock table keyed by aggregate id
pub struct KeyedLocks<K> {
    inflight: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`
    pub fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> R {
        let lock = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                inflight
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        self.release(key, lock);
        result
    }

    /// Number of keys currently held or waited on
    pub fn len(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the table entry once no other caller holds a handle to it
    fn release(&self, key: &K, lock: Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        // Handles are only cloned under the table lock, so the count is exact
        if inflight
            .get(key)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            inflight.remove(key);
        }
    }
}

/// Rerun `op` while the ledger rejects its commit against stale state
///
/// A rejected commit leaves the ledger caught up with whichever writer got
/// there first, so the next run re-validates against current state and
/// usually fails with the matching domain error instead.
pub fn retry_rejected<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(Error::LedgerFailure(LedgerError::Rejected(reason))) if attempt < COMMIT_ATTEMPTS => {
                tracing::debug!("Commit rejected ({}), retrying against current state", reason);
                attempt += 1;
            }
            result => return result,
        }
    }
}
