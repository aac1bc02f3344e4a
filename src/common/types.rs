use std::sync::Arc;
use std::time::Duration;
use parking_lot::RwLock;
use serde::{Serialize, Deserialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames in the buffer pool
pub const BUFFER_POOL_SIZE: usize = 64;

/// Size of the log manager's append buffer in bytes
pub const LOG_BUFFER_SIZE: usize = (BUFFER_POOL_SIZE + 1) * PAGE_SIZE;

/// Periodic wakeup interval of the log flush thread
pub const LOG_TIMEOUT: Duration = Duration::from_secs(1);

/// Page ID type
pub type PageId = i32;

/// Sentinel for a page id that does not refer to any page
pub const INVALID_PAGE_ID: PageId = -1;

/// The page holding the index-name -> root-page-id directory
pub const HEADER_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = i64;

/// Sentinel for an unassigned LSN
pub const INVALID_LSN: Lsn = -1;

/// Record ID: the location of a tuple as (page, slot)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

/// Page structure: a fixed-size byte buffer plus identity and the LSN of the
/// most recent log record describing a change on it
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
    pub lsn: Lsn,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
            lsn: INVALID_LSN,
        }
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
