use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use parking_lot::{Condvar, Mutex};

use crate::common::types::{Rid, TxnId};
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    Shared,
    Exclusive,
}

/// Lock-table entry: the granted mode plus the holder set, kept sorted so
/// the oldest (smallest) transaction id is always `first()`
struct GrantedLock {
    lock_type: LockType,
    granted: BTreeSet<TxnId>,
}

impl GrantedLock {
    fn new(lock_type: LockType, txn_id: TxnId) -> Self {
        Self {
            lock_type,
            granted: BTreeSet::from([txn_id]),
        }
    }

    fn oldest(&self) -> TxnId {
        debug_assert!(!self.granted.is_empty());
        *self.granted.first().expect("granted set is never empty")
    }
}

struct LockTables {
    lock_table: HashMap<Rid, GrantedLock>,
    /// per-RID wait points; the map owns each condvar, waiters hold clones,
    /// and the entry is dropped once only the map's reference remains
    cv_table: HashMap<Rid, Arc<Condvar>>,
}

/// Tuple-level shared/exclusive lock manager enforcing two-phase locking
/// with wait-die deadlock prevention: a requester younger than (or equal to)
/// the oldest holder aborts immediately, a strictly older requester waits.
/// The wait-for relation therefore follows transaction-id order and can
/// never form a cycle.
pub struct LockManager {
    strict_2pl: bool,
    tables: Mutex<LockTables>,
}

impl LockManager {
    pub fn new(strict_2pl: bool) -> Self {
        Self {
            strict_2pl,
            tables: Mutex::new(LockTables {
                lock_table: HashMap::new(),
                cv_table: HashMap::new(),
            }),
        }
    }

    /// Acquire a shared lock on `rid`. Returns false (with the transaction
    /// aborted) on a wait-die loss or protocol violation; blocks while an
    /// older transaction holds the tuple exclusively.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> bool {
        if !Self::state_valid_for_lock(txn) {
            return false;
        }
        // re-acquiring an already-held shared lock is a no-op
        if txn.holds_shared_lock(&rid) {
            return true;
        }

        let txn_id = txn.id();
        let mut tables = self.tables.lock();

        if let Some(entry) = tables.lock_table.get(&rid) {
            if entry.lock_type == LockType::Exclusive {
                if txn_id >= entry.oldest() {
                    txn.set_state(TransactionState::Aborted);
                    return false;
                }
                // older than the holder: wait until the tuple is free or
                // shared. Spurious wakeups are handled by the re-check.
                let cv = Self::condvar(&mut tables, rid);
                while tables
                    .lock_table
                    .get(&rid)
                    .is_some_and(|e| e.lock_type == LockType::Exclusive)
                {
                    cv.wait(&mut tables);
                }
            }
        }

        match tables.lock_table.get_mut(&rid) {
            None => {
                tables
                    .lock_table
                    .insert(rid, GrantedLock::new(LockType::Shared, txn_id));
            }
            Some(entry) => {
                debug_assert_eq!(entry.lock_type, LockType::Shared);
                entry.granted.insert(txn_id);
            }
        }
        txn.add_shared_lock(rid);
        true
    }

    /// Acquire an exclusive lock on `rid` under the same wait-die rule
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> bool {
        if !Self::state_valid_for_lock(txn) {
            return false;
        }
        if txn.holds_exclusive_lock(&rid) {
            return true;
        }

        let txn_id = txn.id();
        let mut tables = self.tables.lock();

        if let Some(entry) = tables.lock_table.get(&rid) {
            if txn_id >= entry.oldest() {
                txn.set_state(TransactionState::Aborted);
                return false;
            }
            let cv = Self::condvar(&mut tables, rid);
            while tables.lock_table.contains_key(&rid) {
                cv.wait(&mut tables);
            }
        }

        tables
            .lock_table
            .insert(rid, GrantedLock::new(LockType::Exclusive, txn_id));
        txn.add_exclusive_lock(rid);
        true
    }

    /// Upgrade an already-held shared lock to exclusive. The shared hold is
    /// given up first; if other sharers remain, wait-die applies against
    /// them.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> bool {
        if !Self::state_valid_for_lock(txn) {
            return false;
        }

        let txn_id = txn.id();
        let mut tables = self.tables.lock();

        let Some(entry) = tables.lock_table.get_mut(&rid) else {
            txn.set_state(TransactionState::Aborted);
            return false;
        };
        if entry.lock_type != LockType::Shared || !entry.granted.contains(&txn_id) {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        txn.remove_shared_lock(&rid);
        entry.granted.remove(&txn_id);

        if entry.granted.is_empty() {
            entry.lock_type = LockType::Exclusive;
            entry.granted.insert(txn_id);
            txn.add_exclusive_lock(rid);
            return true;
        }

        if txn_id >= entry.oldest() {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let cv = Self::condvar(&mut tables, rid);
        while tables.lock_table.contains_key(&rid) {
            cv.wait(&mut tables);
        }
        tables
            .lock_table
            .insert(rid, GrantedLock::new(LockType::Exclusive, txn_id));
        txn.add_exclusive_lock(rid);
        true
    }

    /// Release the lock held on `rid`. Under strict 2PL this is only legal
    /// once the transaction has committed or aborted; otherwise the first
    /// unlock moves a Growing transaction to Shrinking. The last holder
    /// leaving wakes every waiter.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> bool {
        if self.strict_2pl
            && !matches!(
                txn.state(),
                TransactionState::Committed | TransactionState::Aborted
            )
        {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        let txn_id = txn.id();
        let mut tables = self.tables.lock();

        let Some(entry) = tables.lock_table.get_mut(&rid) else {
            txn.set_state(TransactionState::Aborted);
            return false;
        };
        if !entry.granted.remove(&txn_id) {
            txn.set_state(TransactionState::Aborted);
            return false;
        }

        if !self.strict_2pl && txn.state() == TransactionState::Growing {
            txn.set_state(TransactionState::Shrinking);
        }

        match entry.lock_type {
            LockType::Shared => txn.remove_shared_lock(&rid),
            LockType::Exclusive => txn.remove_exclusive_lock(&rid),
        }

        if entry.granted.is_empty() {
            tables.lock_table.remove(&rid);
            if let Some(cv) = tables.cv_table.get(&rid) {
                cv.notify_all();
                if Arc::strong_count(cv) == 1 {
                    tables.cv_table.remove(&rid);
                }
            }
        }
        true
    }

    /// Number of RIDs currently locked; test introspection
    pub fn locked_rid_count(&self) -> usize {
        self.tables.lock().lock_table.len()
    }

    fn state_valid_for_lock(txn: &Transaction) -> bool {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return false;
        }
        true
    }

    fn condvar(tables: &mut LockTables, rid: Rid) -> Arc<Condvar> {
        tables
            .cv_table
            .entry(rid)
            .or_insert_with(|| Arc::new(Condvar::new()))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_locks_coexist() {
        let lock_mgr = LockManager::new(false);
        let t0 = Transaction::new(0);
        let t1 = Transaction::new(1);
        let rid = Rid::new(0, 0);

        assert!(lock_mgr.lock_shared(&t0, rid));
        assert!(lock_mgr.lock_shared(&t1, rid));
        assert_eq!(lock_mgr.locked_rid_count(), 1);

        assert!(lock_mgr.unlock(&t0, rid));
        assert!(lock_mgr.unlock(&t1, rid));
        assert_eq!(lock_mgr.locked_rid_count(), 0);
    }

    #[test]
    fn test_younger_exclusive_requester_dies() {
        let lock_mgr = LockManager::new(false);
        let older = Transaction::new(0);
        let younger = Transaction::new(1);
        let rid = Rid::new(0, 0);

        assert!(lock_mgr.lock_exclusive(&older, rid));
        assert!(!lock_mgr.lock_shared(&younger, rid));
        assert_eq!(younger.state(), TransactionState::Aborted);
        assert_eq!(older.state(), TransactionState::Growing);
    }

    #[test]
    fn test_reacquire_is_noop() {
        let lock_mgr = LockManager::new(false);
        let txn = Transaction::new(0);
        let rid = Rid::new(0, 0);

        assert!(lock_mgr.lock_shared(&txn, rid));
        assert!(lock_mgr.lock_shared(&txn, rid));
        assert!(lock_mgr.unlock(&txn, rid));
        assert_eq!(lock_mgr.locked_rid_count(), 0);
    }

    #[test]
    fn test_upgrade_sole_sharer() {
        let lock_mgr = LockManager::new(false);
        let txn = Transaction::new(0);
        let rid = Rid::new(1, 2);

        assert!(lock_mgr.lock_shared(&txn, rid));
        assert!(lock_mgr.lock_upgrade(&txn, rid));
        assert!(txn.holds_exclusive_lock(&rid));
        assert!(!txn.holds_shared_lock(&rid));
    }

    #[test]
    fn test_upgrade_without_shared_aborts() {
        let lock_mgr = LockManager::new(false);
        let txn = Transaction::new(0);
        let rid = Rid::new(1, 2);

        assert!(!lock_mgr.lock_upgrade(&txn, rid));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_younger_upgrader_dies_against_remaining_sharer() {
        let lock_mgr = LockManager::new(false);
        let older = Transaction::new(0);
        let younger = Transaction::new(1);
        let rid = Rid::new(0, 0);

        assert!(lock_mgr.lock_shared(&older, rid));
        assert!(lock_mgr.lock_shared(&younger, rid));
        assert!(!lock_mgr.lock_upgrade(&younger, rid));
        assert_eq!(younger.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_strict_2pl_rejects_unlock_before_commit() {
        let lock_mgr = LockManager::new(true);
        let txn = Transaction::new(0);
        let rid = Rid::new(0, 0);

        assert!(lock_mgr.lock_shared(&txn, rid));
        assert!(!lock_mgr.unlock(&txn, rid));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_non_strict_unlock_enters_shrinking() {
        let lock_mgr = LockManager::new(false);
        let txn = Transaction::new(0);
        let rid_a = Rid::new(0, 0);
        let rid_b = Rid::new(0, 1);

        assert!(lock_mgr.lock_shared(&txn, rid_a));
        assert!(lock_mgr.unlock(&txn, rid_a));
        assert_eq!(txn.state(), TransactionState::Shrinking);

        // acquisition in the shrinking phase is a protocol violation
        assert!(!lock_mgr.lock_shared(&txn, rid_b));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_unlock_without_hold_aborts() {
        let lock_mgr = LockManager::new(false);
        let txn = Transaction::new(0);
        assert!(!lock_mgr.unlock(&txn, Rid::new(5, 5)));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
