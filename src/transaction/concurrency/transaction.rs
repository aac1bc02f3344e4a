use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use parking_lot::Mutex;

use crate::common::types::{Lsn, Rid, TxnId, INVALID_LSN};
use crate::storage::table::{TableHeap, Tuple};

/// Two-phase locking transaction states. Transitions only move forward:
/// Growing -> (Shrinking ->)? (Committed | Aborted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Kind of write a transaction performed, for commit/abort processing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    Insert,
    Update,
    Delete,
}

/// One undo item in a transaction's write set
pub struct WriteRecord {
    pub rid: Rid,
    pub wtype: WriteType,
    /// old image for Update, the deleted tuple for Delete, unused for Insert
    pub old_tuple: Tuple,
    pub table: Arc<TableHeap>,
}

impl WriteRecord {
    pub fn new(rid: Rid, wtype: WriteType, old_tuple: Tuple, table: Arc<TableHeap>) -> Self {
        Self {
            rid,
            wtype,
            old_tuple,
            table,
        }
    }
}

/// An active transaction. All fields sit behind interior mutability so a
/// shared `&Transaction` can cross threads; the lock manager and transaction
/// manager are the only writers.
pub struct Transaction {
    txn_id: TxnId,
    state: Mutex<TransactionState>,
    prev_lsn: AtomicI64,
    shared_lock_set: Mutex<HashSet<Rid>>,
    exclusive_lock_set: Mutex<HashSet<Rid>>,
    write_set: Mutex<Vec<WriteRecord>>,
}

impl Transaction {
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            state: Mutex::new(TransactionState::Growing),
            prev_lsn: AtomicI64::new(INVALID_LSN),
            shared_lock_set: Mutex::new(HashSet::new()),
            exclusive_lock_set: Mutex::new(HashSet::new()),
            write_set: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.txn_id
    }

    pub fn state(&self) -> TransactionState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.lock() = state;
    }

    /// Tail of this transaction's log-record chain
    pub fn prev_lsn(&self) -> Lsn {
        self.prev_lsn.load(Ordering::SeqCst)
    }

    pub fn set_prev_lsn(&self, lsn: Lsn) {
        self.prev_lsn.store(lsn, Ordering::SeqCst);
    }

    pub fn add_shared_lock(&self, rid: Rid) {
        self.shared_lock_set.lock().insert(rid);
    }

    pub fn add_exclusive_lock(&self, rid: Rid) {
        self.exclusive_lock_set.lock().insert(rid);
    }

    pub fn remove_shared_lock(&self, rid: &Rid) {
        self.shared_lock_set.lock().remove(rid);
    }

    pub fn remove_exclusive_lock(&self, rid: &Rid) {
        self.exclusive_lock_set.lock().remove(rid);
    }

    pub fn holds_shared_lock(&self, rid: &Rid) -> bool {
        self.shared_lock_set.lock().contains(rid)
    }

    pub fn holds_exclusive_lock(&self, rid: &Rid) -> bool {
        self.exclusive_lock_set.lock().contains(rid)
    }

    /// Every RID this transaction currently holds a lock on
    pub fn locked_rids(&self) -> Vec<Rid> {
        let mut rids: HashSet<Rid> = self.shared_lock_set.lock().iter().copied().collect();
        rids.extend(self.exclusive_lock_set.lock().iter().copied());
        rids.into_iter().collect()
    }

    pub fn append_write_record(&self, record: WriteRecord) {
        self.write_set.lock().push(record);
    }

    /// Drain the write set, newest first
    pub fn take_write_set(&self) -> Vec<WriteRecord> {
        let mut records = std::mem::take(&mut *self.write_set.lock());
        records.reverse();
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_defaults() {
        let txn = Transaction::new(0);
        assert_eq!(txn.id(), 0);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.prev_lsn(), INVALID_LSN);
        assert!(txn.locked_rids().is_empty());
    }

    #[test]
    fn test_lock_set_tracking() {
        let txn = Transaction::new(1);
        let rid = Rid::new(3, 4);

        txn.add_shared_lock(rid);
        assert!(txn.holds_shared_lock(&rid));
        assert!(!txn.holds_exclusive_lock(&rid));

        txn.remove_shared_lock(&rid);
        txn.add_exclusive_lock(rid);
        assert!(txn.holds_exclusive_lock(&rid));
        assert_eq!(txn.locked_rids(), vec![rid]);
    }

    #[test]
    fn test_prev_lsn_chain() {
        let txn = Transaction::new(2);
        txn.set_prev_lsn(5);
        assert_eq!(txn.prev_lsn(), 5);
        txn.set_prev_lsn(9);
        assert_eq!(txn.prev_lsn(), 9);
    }
}
