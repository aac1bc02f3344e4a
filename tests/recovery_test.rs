use std::sync::Arc;
use anyhow::Result;

use granitedb::common::types::{Rid, INVALID_LSN};
use granitedb::storage::page::TablePage;
use granitedb::storage::table::{TableHeap, Tuple};
use granitedb::transaction::concurrency::lock_manager::LockManager;
use granitedb::transaction::concurrency::transaction_manager::TransactionManager;
use granitedb::transaction::wal::log_record::LogRecord;
use granitedb::transaction::wal::recovery::LogRecovery;

mod common;
use common::{create_test_engine, open_engine};

/// Redo of a committed insert written directly into the log: after the
/// crash, page 7 slot 3 must hold the tuple and no transaction may remain
/// active.
#[test]
fn test_redo_committed_insert_from_raw_log() -> Result<()> {
    let (_, log_manager, _buffer_pool, dir) = create_test_engine(16)?;
    log_manager.run_flush_thread();

    let rid = Rid::new(7, 3);
    let tuple = Tuple::new(vec![0xDE, 0xAD, 0xBE, 0xEF]);

    let mut begin = LogRecord::new_begin(1);
    let begin_lsn = log_manager.append_log_record(&mut begin)?;
    let mut insert = LogRecord::new_insert(1, begin_lsn, rid, tuple.clone());
    let insert_lsn = log_manager.append_log_record(&mut insert)?;
    let mut commit = LogRecord::new_commit(1, insert_lsn);
    let commit_lsn = log_manager.append_log_record(&mut commit)?;

    log_manager.flush_till_lsn(commit_lsn);
    log_manager.stop_flush_thread();
    // crash: the data page never reached disk

    let (disk_manager, _, buffer_pool) = open_engine(&dir, 16)?;
    let mut recovery = LogRecovery::new(disk_manager, Arc::clone(&buffer_pool));
    recovery.redo()?;
    assert!(
        recovery.active_transactions().is_empty(),
        "committed transaction must not survive the redo pass"
    );
    recovery.undo()?;

    let page = buffer_pool.fetch_page(7)?;
    {
        let page_guard = page.read();
        assert_eq!(TablePage::get_tuple(&page_guard, 3), Some(tuple));
        assert_eq!(TablePage::get_lsn(&page_guard), insert_lsn);
    }
    buffer_pool.unpin_page(7, false)?;
    Ok(())
}

/// Undo of an uncommitted insert: redo re-applies it, undo reverses it, and
/// the slot ends up empty
#[test]
fn test_undo_uncommitted_insert_from_raw_log() -> Result<()> {
    let (_, log_manager, _buffer_pool, dir) = create_test_engine(16)?;
    log_manager.run_flush_thread();

    let rid = Rid::new(7, 4);
    let tuple = Tuple::new(vec![0x55; 8]);

    let mut begin = LogRecord::new_begin(2);
    let begin_lsn = log_manager.append_log_record(&mut begin)?;
    let mut insert = LogRecord::new_insert(2, begin_lsn, rid, tuple);
    let insert_lsn = log_manager.append_log_record(&mut insert)?;

    log_manager.flush_till_lsn(insert_lsn);
    log_manager.stop_flush_thread();
    // crash without a COMMIT record

    let (disk_manager, _, buffer_pool) = open_engine(&dir, 16)?;
    let mut recovery = LogRecovery::new(disk_manager, Arc::clone(&buffer_pool));
    recovery.redo()?;
    assert_eq!(recovery.active_transactions(), vec![2]);
    recovery.undo()?;
    assert!(recovery.active_transactions().is_empty());

    let page = buffer_pool.fetch_page(7)?;
    {
        let page_guard = page.read();
        assert_eq!(TablePage::get_tuple(&page_guard, 4), None);
        assert_ne!(TablePage::get_lsn(&page_guard), INVALID_LSN);
    }
    buffer_pool.unpin_page(7, false)?;
    Ok(())
}

/// Redo is gated on the page LSN, so running recovery twice leaves the same
/// state as running it once
#[test]
fn test_redo_is_idempotent() -> Result<()> {
    let (_, log_manager, _buffer_pool, dir) = create_test_engine(16)?;
    log_manager.run_flush_thread();

    let rid = Rid::new(5, 0);
    let tuple = Tuple::new(vec![1, 2, 3]);
    let mut begin = LogRecord::new_begin(1);
    let begin_lsn = log_manager.append_log_record(&mut begin)?;
    let mut insert = LogRecord::new_insert(1, begin_lsn, rid, tuple.clone());
    let insert_lsn = log_manager.append_log_record(&mut insert)?;
    let mut commit = LogRecord::new_commit(1, insert_lsn);
    log_manager.append_log_record(&mut commit)?;
    log_manager.stop_flush_thread();

    let (disk_manager, _, buffer_pool) = open_engine(&dir, 16)?;
    let mut recovery = LogRecovery::new(Arc::clone(&disk_manager), Arc::clone(&buffer_pool));
    recovery.redo()?;
    recovery.undo()?;
    // flush so the second pass sees the stamped page on disk
    buffer_pool.flush_all_pages()?;

    let mut second = LogRecovery::new(disk_manager, Arc::clone(&buffer_pool));
    second.redo()?;
    second.undo()?;

    let page = buffer_pool.fetch_page(5)?;
    {
        let page_guard = page.read();
        assert_eq!(TablePage::get_tuple(&page_guard, 0), Some(tuple));
    }
    buffer_pool.unpin_page(5, false)?;
    Ok(())
}

/// End-to-end crash recovery through the table heap: a committed
/// transaction's effects survive, a loser's update and mark-delete are
/// rolled back
#[test]
fn test_crash_recovery_end_to_end() -> Result<()> {
    let (_, log_manager, buffer_pool, dir) = create_test_engine(16)?;
    log_manager.run_flush_thread();

    let lock_manager = Arc::new(LockManager::new(true));
    let txn_manager =
        TransactionManager::new(Arc::clone(&lock_manager), Some(Arc::clone(&log_manager)));

    // committed work
    let setup_txn = txn_manager.begin()?;
    let heap = TableHeap::new(
        Arc::clone(&buffer_pool),
        Some(Arc::clone(&log_manager)),
        &setup_txn,
    )?;
    let first_page_id = heap.first_page_id();
    let updated_rid = heap.insert_tuple(&setup_txn, Tuple::new(vec![1, 1]))?;
    let marked_rid = heap.insert_tuple(&setup_txn, Tuple::new(vec![2, 2]))?;
    let kept_rid = heap.insert_tuple(&setup_txn, Tuple::new(vec![3, 3]))?;
    txn_manager.commit(&setup_txn)?;

    // loser transaction: mutates but never commits
    let loser = txn_manager.begin()?;
    heap.update_tuple(&loser, updated_rid, Tuple::new(vec![9, 9]))?;
    heap.mark_delete(&loser, marked_rid)?;
    log_manager.force_flush_and_wait();

    // crash: stop logging and drop the pool without flushing data pages
    log_manager.stop_flush_thread();
    drop(heap);
    drop(buffer_pool);

    let (disk_manager, _, buffer_pool) = open_engine(&dir, 16)?;
    let mut recovery = LogRecovery::new(disk_manager, Arc::clone(&buffer_pool));
    recovery.redo()?;
    assert_eq!(recovery.active_transactions(), vec![loser.id()]);
    recovery.undo()?;

    let heap = TableHeap::open(buffer_pool, None, first_page_id);
    assert_eq!(heap.get_tuple(updated_rid)?, Some(Tuple::new(vec![1, 1])));
    assert_eq!(heap.get_tuple(marked_rid)?, Some(Tuple::new(vec![2, 2])));
    assert_eq!(heap.get_tuple(kept_rid)?, Some(Tuple::new(vec![3, 3])));
    Ok(())
}

/// A committed transaction whose deferred delete ran at commit stays
/// deleted after recovery
#[test]
fn test_committed_delete_survives_recovery() -> Result<()> {
    let (_, log_manager, buffer_pool, dir) = create_test_engine(16)?;
    log_manager.run_flush_thread();

    let lock_manager = Arc::new(LockManager::new(true));
    let txn_manager =
        TransactionManager::new(Arc::clone(&lock_manager), Some(Arc::clone(&log_manager)));

    let setup_txn = txn_manager.begin()?;
    let heap = TableHeap::new(
        Arc::clone(&buffer_pool),
        Some(Arc::clone(&log_manager)),
        &setup_txn,
    )?;
    let first_page_id = heap.first_page_id();
    let rid = heap.insert_tuple(&setup_txn, Tuple::new(vec![4, 4]))?;
    txn_manager.commit(&setup_txn)?;

    let deleter = txn_manager.begin()?;
    heap.mark_delete(&deleter, rid)?;
    txn_manager.commit(&deleter)?;

    log_manager.stop_flush_thread();
    drop(heap);
    drop(buffer_pool);

    let (disk_manager, _, buffer_pool) = open_engine(&dir, 16)?;
    let mut recovery = LogRecovery::new(disk_manager, Arc::clone(&buffer_pool));
    recovery.redo()?;
    recovery.undo()?;

    let heap = TableHeap::open(buffer_pool, None, first_page_id);
    assert_eq!(heap.get_tuple(rid)?, None);
    Ok(())
}
