//! Non-blocking, two-phase-locking lock manager keyed by `(table, primary
//! key value)`.
//!
//! Grounded on `small-db`'s `ConcurrentStatus` (shared-lock map, exclusive-
//! lock map, and a per-transaction held-key set, all guarded by one mutex
//! so lock acquisition is atomic), adapted from its blocking
//! sleep-and-retry loop to the spec's non-blocking refusal: a conflicting
//! request returns `false` immediately instead of waiting, and deadlock is
//! avoided by refusal rather than detection.


use hashbrown::{HashMap, HashSet};
use log::debug;
use std::sync::Mutex;

pub type TransactionId = u64;

/// The four operations a caller may request a lock for. `Read` is shared;
/// the rest are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Read,
    Insert,
    Update,
    Delete,
}

impl LockMode {
    fn is_exclusive(self) -> bool {
        !matches!(self, LockMode::Read)
    }
}

type Key = (String, i64);

#[derive(Default)]
struct Inner {
    shared: HashMap<Key, HashSet<TransactionId>>,
    exclusive: HashMap<Key, TransactionId>,
    held_by: HashMap<TransactionId, HashSet<Key>>,
}

/// Per-key shared/exclusive lock table. All methods take `&self`: the
/// single internal mutex is what makes grant decisions atomic across
/// concurrent callers, the same role `small-db`'s `modification_lock`
/// plays around its `add_lock`.
#[derive(Default)]
pub struct LockManager {
    inner: Mutex<Inner>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt to acquire `mode` on `(table, key)` for `tx_id`. Returns
    /// `false` without blocking on any conflict; callers treat a `false`
    /// as an abort signal, not something to retry.
    pub fn acquire_lock(&self, tx_id: TransactionId, table: &str, key: i64, mode: LockMode) -> bool {
        let mut inner = self.inner.lock().expect("lock manager mutex poisoned");
        let lock_key = (table.to_string(), key);

        if let Some(&holder) = inner.exclusive.get(&lock_key) {
            if holder != tx_id {
                debug!("acquire_lock refused: {lock_key:?} held exclusively by {holder}");
                return false;
            }
        } else if mode.is_exclusive()
            && inner
                .shared
                .get(&lock_key)
                .is_some_and(|holders| holders.iter().any(|&h| h != tx_id))
        {
            debug!("acquire_lock refused: {lock_key:?} held shared by another tx");
            return false;
        }

        if mode.is_exclusive() {
            inner.exclusive.insert(lock_key.clone(), tx_id);
        } else {
            inner.shared.entry(lock_key.clone()).or_default().insert(tx_id);
        }
        inner.held_by.entry(tx_id).or_default().insert(lock_key);
        true
    }

    /// Release every lock `tx_id` currently holds.
    pub fn release_all(&self, tx_id: TransactionId) {
        let mut inner = self.inner.lock().expect("lock manager mutex poisoned");
        let Some(keys) = inner.held_by.remove(&tx_id) else {
            return;
        };

        for key in keys {
            if let Some(holders) = inner.shared.get_mut(&key) {
                holders.remove(&tx_id);
                if holders.is_empty() {
                    inner.shared.remove(&key);
                }
            }
            if inner.exclusive.get(&key) == Some(&tx_id) {
                inner.exclusive.remove(&key);
            }
        }
    }
}
