use std::collections::VecDeque;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::disk::DiskManager;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LRUReplacer;
use crate::storage::hash::ExtendibleHashTable;
use crate::transaction::wal::log_manager::LogManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 16;

pub type Result<T> = std::result::Result<T, BufferPoolError>;

/// Fixed-size pool of page frames backing a subset of on-disk pages. Owns
/// the frame -> page mapping (an extendible hash table), a free list of
/// unused frames, and an LRU replacer over unpinned frames. Callers borrow a
/// page between `fetch_page` and the matching `unpin_page`.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    free_list: Mutex<VecDeque<FrameId>>,
    replacer: LRUReplacer<FrameId>,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
    /// serializes whole operations so the one-frame-per-page invariant holds
    latch: Mutex<()>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::build(pool_size, disk_manager, None)
    }

    /// A pool that enforces write-ahead logging: before a dirty page is
    /// written back, the log is forced up to that page's LSN.
    pub fn new_with_wal(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::build(pool_size, disk_manager, Some(log_manager))
    }

    fn build(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            free_list: Mutex::new(free_list),
            replacer: LRUReplacer::new(),
            disk_manager,
            log_manager,
            latch: Mutex::new(()),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page, pinning its frame. Resident pages are pinned in place;
    /// otherwise a frame is taken from the free list or evicted from the
    /// replacer (flushing it first if dirty) and the page is read from disk.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let mut frame = self.frames[frame_id].write();
            frame.pin_count += 1;
            // pinned frames are not eviction candidates
            self.replacer.erase(&frame_id);
            return Ok(frame.page.clone());
        }

        let frame_id = self.allocate_frame()?;
        let frame = &self.frames[frame_id];

        {
            let frame_guard = frame.read();
            let mut page_guard = frame_guard.page.write();
            *page_guard = Page::new(page_id);
            self.disk_manager.read_page(page_id, &mut page_guard)?;
        }
        {
            let mut frame_guard = frame.write();
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }

        self.page_table.insert(page_id, frame_id);
        Ok(frame.read().page.clone())
    }

    /// Allocate a fresh page id from the disk manager and pin a zeroed frame
    /// for it
    pub fn new_page(&self) -> Result<(PagePtr, PageId)> {
        let _guard = self.latch.lock();

        let page_id = self.disk_manager.allocate_page()?;
        let frame_id = match self.allocate_frame() {
            Ok(frame_id) => frame_id,
            Err(e) => {
                self.disk_manager.deallocate_page(page_id);
                return Err(e);
            }
        };
        let frame = &self.frames[frame_id];

        {
            let frame_guard = frame.read();
            let mut page_guard = frame_guard.page.write();
            *page_guard = Page::new(page_id);
        }
        {
            let mut frame_guard = frame.write();
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = true;
        }

        self.page_table.insert(page_id, frame_id);
        Ok((frame.read().page.clone(), page_id))
    }

    /// Drop one pin on a page, OR-ing in the caller's dirty hint. A frame
    /// whose pin count reaches zero becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<()> {
        let _guard = self.latch.lock();

        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let mut frame = self.frames[frame_id].write();
        if frame.pin_count > 0 {
            frame.pin_count -= 1;
        }
        if is_dirty {
            frame.is_dirty = true;
        }
        if frame.pin_count == 0 {
            self.replacer.insert(frame_id);
        }
        Ok(())
    }

    /// Write a page's current contents to disk and clear its dirty bit.
    /// Returns Ok(false) when the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let _guard = self.latch.lock();
        self.flush_page_internal(page_id)
    }

    /// Flush every resident dirty page
    pub fn flush_all_pages(&self) -> Result<()> {
        let _guard = self.latch.lock();
        for frame in &self.frames {
            let page_id = frame.read().page.read().page_id;
            if page_id != INVALID_PAGE_ID {
                self.flush_page_internal(page_id)?;
            }
        }
        Ok(())
    }

    /// Remove an unpinned page from the pool and hand its id back to the
    /// disk manager's free list
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let _guard = self.latch.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &self.frames[frame_id];
            {
                let mut frame_guard = frame.write();
                if frame_guard.pin_count > 0 {
                    return Err(BufferPoolError::PagePinned(page_id));
                }
                let mut page_guard = frame_guard.page.write();
                *page_guard = Page::new(INVALID_PAGE_ID);
                drop(page_guard);
                frame_guard.is_dirty = false;
            }
            self.page_table.remove(&page_id);
            self.replacer.erase(&frame_id);
            self.free_list.lock().push_back(frame_id);
        }

        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    fn flush_page_internal(&self, page_id: PageId) -> Result<bool> {
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(false);
        };

        let frame = &self.frames[frame_id];
        let needs_flush = frame.read().is_dirty;
        if needs_flush {
            let page_copy = frame.read().page.read().clone();
            self.write_page_with_wal(&page_copy)?;
            frame.write().is_dirty = false;
        }
        Ok(true)
    }

    /// Pick a frame for reuse: free list first, else the LRU victim. A
    /// victim's old page is flushed if dirty and unmapped.
    fn allocate_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop_front() {
            return Ok(frame_id);
        }

        let victim_id = self.replacer.victim().ok_or(BufferPoolError::BufferPoolFull)?;
        let frame = &self.frames[victim_id];

        let (old_page_id, dirty) = {
            let frame_guard = frame.read();
            debug_assert_eq!(frame_guard.pin_count, 0, "replacer frame must be unpinned");
            let page_id = frame_guard.page.read().page_id;
            (page_id, frame_guard.is_dirty)
        };

        if dirty {
            let page_copy = frame.read().page.read().clone();
            self.write_page_with_wal(&page_copy)?;
            frame.write().is_dirty = false;
        }

        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }

        Ok(victim_id)
    }

    /// Write-ahead rule: the log must be durable at least up to the page's
    /// LSN before the page itself reaches disk
    fn write_page_with_wal(&self, page: &Page) -> Result<()> {
        if let Some(log_manager) = &self.log_manager {
            if log_manager.is_enabled() && page.lsn > log_manager.persistent_lsn() {
                log_manager.flush_till_lsn(page.lsn);
            }
        }
        self.disk_manager.write_page(page)?;
        Ok(())
    }
}
