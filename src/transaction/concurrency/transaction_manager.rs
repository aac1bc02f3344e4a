use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use log::debug;
use thiserror::Error;

use crate::storage::table::TableHeapError;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{Transaction, TransactionState, WriteType};
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::LogRecord;

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Table heap error: {0}")]
    TableHeapError(#[from] TableHeapError),

    #[error("WAL error: {0}")]
    LogError(#[from] LogManagerError),
}

pub type Result<T> = std::result::Result<T, TransactionError>;

/// Creates transactions and drives them to COMMITTED or ABORTED: commit
/// applies deferred deletes and forces the commit record to durability
/// before any lock is released; abort rolls the write set back in reverse.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>, log_manager: Option<Arc<LogManager>>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(0),
            lock_manager,
            log_manager,
        }
    }

    /// Start a transaction, logging BEGIN when logging is enabled
    pub fn begin(&self) -> Result<Arc<Transaction>> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id));

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::new_begin(txn_id);
            let lsn = log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
        }

        Ok(txn)
    }

    /// Commit: apply deferred deletes, force the COMMIT record to disk, then
    /// release all locks
    pub fn commit(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Committed);

        // deletes are deferred until commit; everything else is already in
        // place
        for record in txn.take_write_set() {
            if record.wtype == WriteType::Delete {
                record.table.apply_delete(txn, record.rid)?;
            }
        }

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::new_commit(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
            // the commit record must be durable before anyone can observe
            // the committed state
            log_manager.flush_till_lsn(lsn);
        }

        self.release_all_locks(txn);
        Ok(())
    }

    /// Abort: undo the write set newest-first, log ABORT, release locks
    pub fn abort(&self, txn: &Transaction) -> Result<()> {
        txn.set_state(TransactionState::Aborted);
        debug!("aborting txn {}", txn.id());

        for record in txn.take_write_set() {
            match record.wtype {
                WriteType::Insert => record.table.apply_delete(txn, record.rid)?,
                WriteType::Update => {
                    record.table.rollback_update(txn, record.rid, &record.old_tuple)?
                }
                WriteType::Delete => record.table.rollback_delete(txn, record.rid)?,
            }
        }

        if let Some(log_manager) = self.enabled_log_manager() {
            let mut record = LogRecord::new_abort(txn.id(), txn.prev_lsn());
            let lsn = log_manager.append_log_record(&mut record)?;
            txn.set_prev_lsn(lsn);
            log_manager.flush_till_lsn(lsn);
        }

        self.release_all_locks(txn);
        Ok(())
    }

    fn release_all_locks(&self, txn: &Transaction) {
        for rid in txn.locked_rids() {
            self.lock_manager.unlock(txn, rid);
        }
    }

    fn enabled_log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref().filter(|lm| lm.is_enabled())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::Rid;

    #[test]
    fn test_begin_assigns_ids_from_zero() {
        let lock_manager = Arc::new(LockManager::new(false));
        let txn_manager = TransactionManager::new(lock_manager, None);

        let t0 = txn_manager.begin().unwrap();
        let t1 = txn_manager.begin().unwrap();
        assert_eq!(t0.id(), 0);
        assert_eq!(t1.id(), 1);
        assert_eq!(t0.state(), TransactionState::Growing);
    }

    #[test]
    fn test_commit_releases_locks() {
        let lock_manager = Arc::new(LockManager::new(false));
        let txn_manager = TransactionManager::new(Arc::clone(&lock_manager), None);

        let txn = txn_manager.begin().unwrap();
        let rid = Rid::new(1, 1);
        assert!(lock_manager.lock_exclusive(&txn, rid));
        assert_eq!(lock_manager.locked_rid_count(), 1);

        txn_manager.commit(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(lock_manager.locked_rid_count(), 0);
        assert!(txn.locked_rids().is_empty());
    }

    #[test]
    fn test_abort_releases_locks() {
        let lock_manager = Arc::new(LockManager::new(true));
        let txn_manager = TransactionManager::new(Arc::clone(&lock_manager), None);

        let txn = txn_manager.begin().unwrap();
        let rid = Rid::new(2, 0);
        assert!(lock_manager.lock_shared(&txn, rid));

        txn_manager.abort(&txn).unwrap();
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(lock_manager.locked_rid_count(), 0);
    }
}
