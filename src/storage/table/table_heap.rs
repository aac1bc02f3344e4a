use std::sync::Arc;
use log::debug;
use thiserror::Error;

use crate::common::types::{Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::{TablePage, TablePageError, TABLE_PAGE_HEADER_SIZE};
use crate::storage::table::Tuple;
use crate::transaction::concurrency::transaction::{Transaction, WriteRecord, WriteType};
use crate::transaction::wal::log_manager::{LogManager, LogManagerError};
use crate::transaction::wal::log_record::{LogRecord, LogRecordType};

#[derive(Error, Debug)]
pub enum TableHeapError {
    #[error("No tuple at rid {0}")]
    TupleNotFound(Rid),

    #[error("Tuple of {0} bytes can never fit in a page")]
    TupleTooLarge(usize),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),

    #[error("Page error: {0}")]
    PageError(#[from] TablePageError),

    #[error("WAL error: {0}")]
    WalError(#[from] LogManagerError),
}

pub type Result<T> = std::result::Result<T, TableHeapError>;

/// A table stored as a singly-linked chain of slotted pages. Every mutation
/// appends the matching log record when logging is enabled, stamps the page
/// LSN, and (for the public mutators) registers an undo item in the
/// transaction's write set.
pub struct TableHeap {
    buffer_pool: Arc<BufferPoolManager>,
    log_manager: Option<Arc<LogManager>>,
    first_page_id: PageId,
}

impl TableHeap {
    /// Create a heap with one empty page. The page allocation is logged as
    /// NEWPAGE on behalf of `txn`.
    pub fn new(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        txn: &Transaction,
    ) -> Result<Arc<Self>> {
        let (page, first_page_id) = buffer_pool.new_page()?;
        let heap = Arc::new(Self {
            buffer_pool,
            log_manager,
            first_page_id,
        });

        {
            let mut page_guard = page.write();
            TablePage::init(&mut page_guard, INVALID_PAGE_ID);
            heap.log_new_page(txn, INVALID_PAGE_ID, &mut page_guard)?;
        }
        heap.buffer_pool.unpin_page(first_page_id, true)?;
        Ok(heap)
    }

    /// Reattach to an existing heap, e.g. after recovery
    pub fn open(
        buffer_pool: Arc<BufferPoolManager>,
        log_manager: Option<Arc<LogManager>>,
        first_page_id: PageId,
    ) -> Arc<Self> {
        Arc::new(Self {
            buffer_pool,
            log_manager,
            first_page_id,
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    /// Insert a tuple, extending the page chain when every page is full.
    /// Returns the new tuple's RID.
    pub fn insert_tuple(self: &Arc<Self>, txn: &Transaction, tuple: Tuple) -> Result<Rid> {
        if tuple.len() + TABLE_PAGE_HEADER_SIZE + 8 > PAGE_SIZE {
            return Err(TableHeapError::TupleTooLarge(tuple.len()));
        }

        let mut page_id = self.first_page_id;
        loop {
            let page = self.buffer_pool.fetch_page(page_id)?;
            let insert_result = {
                let mut page_guard = page.write();
                match TablePage::insert_tuple(&mut page_guard, &tuple) {
                    Ok(slot) => {
                        let rid = Rid::new(page_id, slot);
                        self.log_tuple_op(txn, LogRecordType::Insert, rid, &tuple, &mut page_guard)
                            .map(|_| rid)
                    }
                    Err(e) => Err(e.into()),
                }
            };

            match insert_result {
                Ok(rid) => {
                    self.buffer_pool.unpin_page(page_id, true)?;
                    txn.append_write_record(WriteRecord::new(
                        rid,
                        WriteType::Insert,
                        Tuple::default(),
                        Arc::clone(self),
                    ));
                    return Ok(rid);
                }
                Err(TableHeapError::PageError(TablePageError::InsufficientSpace)) => {
                    let next_page_id = {
                        let page_guard = page.read();
                        TablePage::get_next_page_id(&page_guard)
                    };

                    if next_page_id != INVALID_PAGE_ID {
                        self.buffer_pool.unpin_page(page_id, false)?;
                        page_id = next_page_id;
                        continue;
                    }

                    // extend the chain with a fresh page
                    let (new_page, new_page_id) = self.buffer_pool.new_page()?;
                    {
                        let mut new_guard = new_page.write();
                        TablePage::init(&mut new_guard, page_id);
                        self.log_new_page(txn, page_id, &mut new_guard)?;
                    }
                    {
                        let mut page_guard = page.write();
                        TablePage::set_next_page_id(&mut page_guard, new_page_id);
                    }
                    self.buffer_pool.unpin_page(page_id, true)?;
                    self.buffer_pool.unpin_page(new_page_id, true)?;
                    page_id = new_page_id;
                }
                Err(e) => {
                    self.buffer_pool.unpin_page(page_id, false)?;
                    return Err(e);
                }
            }
        }
    }

    /// Read the tuple at `rid`; None for empty or delete-marked slots
    pub fn get_tuple(&self, rid: Rid) -> Result<Option<Tuple>> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let tuple = {
            let page_guard = page.read();
            TablePage::get_tuple(&page_guard, rid.slot_num)
        };
        self.buffer_pool.unpin_page(rid.page_id, false)?;
        Ok(tuple)
    }

    /// Overwrite the tuple at `rid`, logging both images and registering the
    /// old image for rollback
    pub fn update_tuple(self: &Arc<Self>, txn: &Transaction, rid: Rid, tuple: Tuple) -> Result<()> {
        let old = self.apply_update(txn, rid, &tuple)?;
        txn.append_write_record(WriteRecord::new(
            rid,
            WriteType::Update,
            old,
            Arc::clone(self),
        ));
        Ok(())
    }

    /// Abort-time inverse of `update_tuple`: restore the old image without
    /// touching the write set
    pub fn rollback_update(&self, txn: &Transaction, rid: Rid, old_tuple: &Tuple) -> Result<()> {
        debug!("rollback update of {} for txn {}", rid, txn.id());
        self.apply_update(txn, rid, old_tuple)?;
        Ok(())
    }

    /// Set the delete mark on `rid`; the physical delete is deferred to
    /// commit through the write set
    pub fn mark_delete(self: &Arc<Self>, txn: &Transaction, rid: Rid) -> Result<()> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = (|| -> Result<Tuple> {
            let mut page_guard = page.write();
            let old = TablePage::get_tuple(&page_guard, rid.slot_num)
                .ok_or(TableHeapError::TupleNotFound(rid))?;
            TablePage::mark_delete(&mut page_guard, rid.slot_num)?;
            self.log_tuple_op(txn, LogRecordType::MarkDelete, rid, &old, &mut page_guard)?;
            Ok(old)
        })();

        match result {
            Ok(old) => {
                self.buffer_pool.unpin_page(rid.page_id, true)?;
                txn.append_write_record(WriteRecord::new(
                    rid,
                    WriteType::Delete,
                    old,
                    Arc::clone(self),
                ));
                Ok(())
            }
            Err(e) => {
                self.buffer_pool.unpin_page(rid.page_id, false)?;
                Err(e)
            }
        }
    }

    /// Physically remove the tuple at `rid`. Called at commit for deferred
    /// deletes and at abort to reverse an insert.
    pub fn apply_delete(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = (|| -> Result<()> {
            let mut page_guard = page.write();
            if let Some(old) = TablePage::apply_delete(&mut page_guard, rid.slot_num)? {
                self.log_tuple_op(txn, LogRecordType::ApplyDelete, rid, &old, &mut page_guard)?;
            }
            Ok(())
        })();
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        result
    }

    /// Abort-time inverse of `mark_delete`: clear the delete mark
    pub fn rollback_delete(&self, txn: &Transaction, rid: Rid) -> Result<()> {
        debug!("rollback delete of {} for txn {}", rid, txn.id());
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = (|| -> Result<()> {
            let mut page_guard = page.write();
            TablePage::rollback_delete(&mut page_guard, rid.slot_num)?;
            let tuple = TablePage::get_tuple(&page_guard, rid.slot_num)
                .ok_or(TableHeapError::TupleNotFound(rid))?;
            self.log_tuple_op(txn, LogRecordType::RollbackDelete, rid, &tuple, &mut page_guard)?;
            Ok(())
        })();
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        result
    }

    fn apply_update(&self, txn: &Transaction, rid: Rid, tuple: &Tuple) -> Result<Tuple> {
        let page = self.buffer_pool.fetch_page(rid.page_id)?;
        let result = (|| -> Result<Tuple> {
            let mut page_guard = page.write();
            let old = TablePage::update_tuple(&mut page_guard, rid.slot_num, tuple)?;
            if let Some(log_manager) = self.enabled_log_manager() {
                let mut record = LogRecord::new_update(
                    txn.id(),
                    txn.prev_lsn(),
                    rid,
                    old.clone(),
                    tuple.clone(),
                );
                let lsn = log_manager.append_log_record(&mut record)?;
                txn.set_prev_lsn(lsn);
                TablePage::set_lsn(&mut page_guard, lsn);
            }
            Ok(old)
        })();
        self.buffer_pool.unpin_page(rid.page_id, result.is_ok())?;
        result
    }

    fn log_tuple_op(
        &self,
        txn: &Transaction,
        record_type: LogRecordType,
        rid: Rid,
        tuple: &Tuple,
        page: &mut Page,
    ) -> Result<()> {
        let Some(log_manager) = self.enabled_log_manager() else {
            return Ok(());
        };
        let mut record = match record_type {
            LogRecordType::Insert => {
                LogRecord::new_insert(txn.id(), txn.prev_lsn(), rid, tuple.clone())
            }
            _ => LogRecord::new_delete(txn.id(), txn.prev_lsn(), record_type, rid, tuple.clone()),
        };
        let lsn = log_manager.append_log_record(&mut record)?;
        txn.set_prev_lsn(lsn);
        TablePage::set_lsn(page, lsn);
        Ok(())
    }

    fn log_new_page(
        &self,
        txn: &Transaction,
        prev_page_id: PageId,
        page: &mut Page,
    ) -> Result<()> {
        let Some(log_manager) = self.enabled_log_manager() else {
            return Ok(());
        };
        let mut record = LogRecord::new_page_record(txn.id(), txn.prev_lsn(), prev_page_id);
        let lsn = log_manager.append_log_record(&mut record)?;
        txn.set_prev_lsn(lsn);
        TablePage::set_lsn(page, lsn);
        Ok(())
    }

    fn enabled_log_manager(&self) -> Option<&Arc<LogManager>> {
        self.log_manager.as_ref().filter(|lm| lm.is_enabled())
    }
}
