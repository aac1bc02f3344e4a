use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, info};
use thiserror::Error;

use crate::common::types::{Lsn, Page, Rid, TxnId, INVALID_LSN, INVALID_PAGE_ID, LOG_BUFFER_SIZE};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::storage::page::{TablePage, TablePageError};
use crate::transaction::wal::log_record::{LogPayload, LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("No log record found at LSN {0} while walking an undo chain")]
    MissingLsn(Lsn),

    #[error("Corrupt log record at file offset {0}")]
    CorruptLogRecord(u64),

    #[error("Unexpected {0:?} record in an undo chain")]
    UnexpectedRecordType(LogRecordType),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] TablePageError),
}

pub type Result<T> = std::result::Result<T, RecoveryError>;

/// Crash recovery over the write-ahead log: a forward redo pass that
/// re-applies every effect newer than its page, followed by a backward undo
/// pass that reverses the loser transactions. Run at startup with the log
/// manager's flush thread stopped.
pub struct LogRecovery {
    disk_manager: Arc<DiskManager>,
    buffer_pool: Arc<BufferPoolManager>,
    /// txn id -> LSN of its last seen log record; losers after redo
    active_txn: HashMap<TxnId, Lsn>,
    /// LSN -> log file offset, for the backward undo walk
    lsn_mapping: HashMap<Lsn, u64>,
}

impl LogRecovery {
    pub fn new(disk_manager: Arc<DiskManager>, buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            disk_manager,
            buffer_pool,
            active_txn: HashMap::new(),
            lsn_mapping: HashMap::new(),
        }
    }

    /// Transactions still considered active (losers) after the redo pass
    pub fn active_transactions(&self) -> Vec<TxnId> {
        self.active_txn.keys().copied().collect()
    }

    /// Redo pass: stream the log file from offset 0 in buffer-sized chunks,
    /// rebuilding the active-transaction and LSN-offset tables and
    /// re-applying every mutation whose LSN is newer than its page. A record
    /// that does not fit the remaining chunk is re-read at its own offset;
    /// an undecodable record at a chunk start ends the log.
    pub fn redo(&mut self) -> Result<()> {
        self.active_txn.clear();
        self.lsn_mapping.clear();

        let mut buffer = vec![0u8; LOG_BUFFER_SIZE];
        let mut file_offset: u64 = 0;

        while self.disk_manager.read_log(&mut buffer, file_offset)? {
            let mut chunk_offset = 0usize;
            let mut parsed_any = false;

            while let Some(record) = LogRecord::deserialize(&buffer[chunk_offset..]) {
                self.lsn_mapping.insert(record.lsn, file_offset);

                match record.record_type {
                    LogRecordType::Commit | LogRecordType::Abort => {
                        self.active_txn.remove(&record.txn_id);
                    }
                    _ => {
                        self.active_txn.insert(record.txn_id, record.lsn);
                    }
                }

                self.redo_record(&record)?;

                chunk_offset += record.size as usize;
                file_offset += record.size as u64;
                parsed_any = true;
            }

            if !parsed_any {
                // either a torn tail or corruption: treat as end of log
                debug!("redo stopped at file offset {}", file_offset);
                break;
            }
        }

        info!(
            "redo complete: {} active transaction(s), {} record(s) mapped",
            self.active_txn.len(),
            self.lsn_mapping.len()
        );
        Ok(())
    }

    /// Undo pass: for every loser, walk its record chain backward via
    /// prev_lsn and apply the inverse of each mutation, unconditionally
    /// dirtying the touched pages. Stops at the BEGIN record.
    pub fn undo(&mut self) -> Result<()> {
        let mut buffer = vec![0u8; LOG_BUFFER_SIZE];
        let losers: Vec<(TxnId, Lsn)> = self.active_txn.iter().map(|(&t, &l)| (t, l)).collect();

        for (txn_id, last_lsn) in losers {
            info!("rolling back loser transaction {}", txn_id);
            let mut lsn = last_lsn;

            loop {
                let offset = *self
                    .lsn_mapping
                    .get(&lsn)
                    .ok_or(RecoveryError::MissingLsn(lsn))?;
                if !self.disk_manager.read_log(&mut buffer, offset)? {
                    return Err(RecoveryError::CorruptLogRecord(offset));
                }
                let record = LogRecord::deserialize(&buffer)
                    .ok_or(RecoveryError::CorruptLogRecord(offset))?;
                debug_assert_eq!(record.lsn, lsn);

                match record.record_type {
                    LogRecordType::Begin => break,
                    _ => self.undo_record(&record)?,
                }

                if record.prev_lsn == INVALID_LSN {
                    break;
                }
                lsn = record.prev_lsn;
            }
        }

        self.active_txn.clear();
        self.lsn_mapping.clear();
        Ok(())
    }

    fn redo_record(&self, record: &LogRecord) -> Result<()> {
        match (&record.record_type, &record.payload) {
            (
                LogRecordType::Begin | LogRecordType::Commit | LogRecordType::Abort,
                LogPayload::None,
            ) => Ok(()),

            (LogRecordType::NewPage, LogPayload::NewPage { prev_page_id }) => {
                let prev_page_id = *prev_page_id;
                let (page, new_page_id) = self.buffer_pool.new_page()?;
                {
                    let mut page_guard = page.write();
                    TablePage::init(&mut page_guard, prev_page_id);
                    TablePage::set_lsn(&mut page_guard, record.lsn);
                }
                self.buffer_pool.unpin_page(new_page_id, true)?;

                if prev_page_id != INVALID_PAGE_ID {
                    let prev_page = self.buffer_pool.fetch_page(prev_page_id)?;
                    let redo = {
                        let page_guard = prev_page.read();
                        TablePage::get_next_page_id(&page_guard) == INVALID_PAGE_ID
                    };
                    if redo {
                        let mut page_guard = prev_page.write();
                        TablePage::set_next_page_id(&mut page_guard, new_page_id);
                    }
                    self.buffer_pool.unpin_page(prev_page_id, redo)?;
                }
                Ok(())
            }

            (_, LogPayload::Tuple { rid, tuple }) => {
                let rid = *rid;
                self.with_page_for_redo(rid, record.lsn, |page_guard| {
                    match record.record_type {
                        LogRecordType::Insert => {
                            TablePage::insert_tuple_at(page_guard, rid.slot_num, tuple)?;
                        }
                        LogRecordType::ApplyDelete => {
                            TablePage::apply_delete(page_guard, rid.slot_num)?;
                        }
                        LogRecordType::MarkDelete => {
                            TablePage::mark_delete(page_guard, rid.slot_num)?;
                        }
                        LogRecordType::RollbackDelete => {
                            TablePage::rollback_delete(page_guard, rid.slot_num)?;
                        }
                        _ => unreachable!("tuple payload with non-tuple record type"),
                    }
                    Ok(())
                })
            }

            (LogRecordType::Update, LogPayload::Update { rid, new_tuple, .. }) => {
                let rid = *rid;
                self.with_page_for_redo(rid, record.lsn, |page_guard| {
                    TablePage::update_tuple(page_guard, rid.slot_num, new_tuple)?;
                    Ok(())
                })
            }

            _ => Ok(()),
        }
    }

    /// Fetch the page behind `rid` and run `apply` only when the record is
    /// newer than the page (the idempotence gate), stamping the page LSN on
    /// application. The unpin dirty hint is exactly "was redo applied".
    fn with_page_for_redo<F>(&self, rid: Rid, record_lsn: Lsn, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Page) -> Result<()>,
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = (|| -> Result<bool> {
            let mut page_guard = page.write();
            if !TablePage::is_initialized(&page_guard) {
                // the page never reached disk before the crash
                TablePage::init(&mut page_guard, INVALID_PAGE_ID);
            }
            let redo = record_lsn > TablePage::get_lsn(&page_guard);
            if redo {
                apply(&mut page_guard)?;
                TablePage::set_lsn(&mut page_guard, record_lsn);
            }
            Ok(redo)
        })();

        match result {
            Ok(redo) => {
                self.buffer_pool.unpin_page(rid.page_id, redo)?;
                Ok(())
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Err(e)
            }
        }
    }

    fn undo_record(&self, record: &LogRecord) -> Result<()> {
        match (&record.record_type, &record.payload) {
            // page allocation is not rolled back
            (LogRecordType::NewPage, _) => Ok(()),

            (LogRecordType::Insert, LogPayload::Tuple { rid, .. }) => {
                self.with_page_for_undo(*rid, |page_guard| {
                    TablePage::apply_delete(page_guard, rid.slot_num)?;
                    Ok(())
                })
            }

            (LogRecordType::Update, LogPayload::Update { rid, old_tuple, .. }) => {
                self.with_page_for_undo(*rid, |page_guard| {
                    TablePage::update_tuple(page_guard, rid.slot_num, old_tuple)?;
                    Ok(())
                })
            }

            (LogRecordType::ApplyDelete, LogPayload::Tuple { rid, tuple }) => {
                self.with_page_for_undo(*rid, |page_guard| {
                    TablePage::insert_tuple_at(page_guard, rid.slot_num, tuple)?;
                    Ok(())
                })
            }

            (LogRecordType::MarkDelete, LogPayload::Tuple { rid, .. }) => {
                self.with_page_for_undo(*rid, |page_guard| {
                    TablePage::rollback_delete(page_guard, rid.slot_num)?;
                    Ok(())
                })
            }

            (LogRecordType::RollbackDelete, LogPayload::Tuple { rid, .. }) => {
                self.with_page_for_undo(*rid, |page_guard| {
                    TablePage::mark_delete(page_guard, rid.slot_num)?;
                    Ok(())
                })
            }

            _ => Err(RecoveryError::UnexpectedRecordType(record.record_type)),
        }
    }

    /// Undo unconditionally dirties the page it touches
    fn with_page_for_undo<F>(&self, rid: Rid, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Page) -> Result<()>,
    {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = {
            let mut page_guard = page.write();
            apply(&mut page_guard)
        };
        self.buffer_pool.unpin_page(rid.page_id, true)?;
        result
    }
}
