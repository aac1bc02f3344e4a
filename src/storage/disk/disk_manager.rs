use std::fs::{File, OpenOptions};
use std::io::{Read, Write, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

pub type Result<T> = std::result::Result<T, DiskManagerError>;

/// DiskManager handles the actual disk I/O: a paged database file addressed
/// by page id, and an append-only log file.
pub struct DiskManager {
    db_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
    free_pages: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Open (or create) the database and log files. Page 0 is reserved for
    /// the header directory, so freshly created databases start allocating
    /// at page 1.
    pub fn new(db_path: impl AsRef<Path>, log_path: impl AsRef<Path>) -> Result<Self> {
        let db_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let log_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(log_path)?;

        // Resume allocation after the last page already in the file
        let file_size = db_file.metadata()?.len();
        let page_count = file_size.div_ceil(PAGE_SIZE as u64) as PageId;
        let next_page_id = page_count.max(1);

        Ok(Self {
            db_file: Mutex::new(db_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicI32::new(next_page_id),
            free_pages: Mutex::new(Vec::new()),
        })
    }

    /// Read a page from disk. Reading past the end of the file yields a
    /// zeroed page, so pages can be fetched before their first write-back.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<()> {
        if page_id == INVALID_PAGE_ID || page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = Self::page_offset(page_id);
        let mut buffer = [0u8; PAGE_SIZE];

        {
            let mut file = self.db_file.lock();
            let file_size = file.metadata()?.len();

            if offset >= file_size {
                *page = Page::new(page_id);
                return Ok(());
            }

            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buffer)?;
        }

        page.data.copy_from_slice(&buffer);
        page.page_id = page_id;
        Ok(())
    }

    /// Write a page to disk at its page-id offset
    pub fn write_page(&self, page: &Page) -> Result<()> {
        if page.page_id == INVALID_PAGE_ID || page.page_id < 0 {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = Self::page_offset(page.page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;
        Ok(())
    }

    /// Allocate a page id, preferring previously deallocated ids
    pub fn allocate_page(&self) -> Result<PageId> {
        if let Some(page_id) = self.free_pages.lock().pop() {
            return Ok(page_id);
        }
        Ok(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Return a page id to the free list for reuse
    pub fn deallocate_page(&self, page_id: PageId) {
        if page_id != INVALID_PAGE_ID {
            self.free_pages.lock().push(page_id);
        }
    }

    /// Fill `buf` with up to `buf.len()` bytes of the log file starting at
    /// `offset`. Returns false once no bytes are available at that offset.
    pub fn read_log(&self, buf: &mut [u8], offset: u64) -> Result<bool> {
        let mut file = self.log_file.lock();
        let file_size = file.metadata()?.len();
        if offset >= file_size {
            return Ok(false);
        }

        file.seek(SeekFrom::Start(offset))?;
        let available = ((file_size - offset) as usize).min(buf.len());
        file.read_exact(&mut buf[..available])?;
        // zero the tail so stale bytes never parse as a record
        buf[available..].fill(0);
        Ok(true)
    }

    /// Append `data` to the log file and sync it to stable storage
    pub fn write_log(&self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut file = self.log_file.lock();
        file.write_all(data)?;
        file.sync_data()?;
        Ok(())
    }

    /// Current size of the log file in bytes
    pub fn log_size(&self) -> Result<u64> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    fn page_offset(page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}
