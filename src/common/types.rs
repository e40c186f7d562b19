use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type; page ids are allocated from 0 by the buffer pool
pub type PageId = i32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = -1;

/// Buffer pool frame ID type, dense in `[0, pool_size)`
pub type FrameId = usize;

/// Transaction ID type
pub type TxnId = u32;

/// Table OID type
pub type TableId = u32;

/// Record ID: disk address of a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// Page structure: the raw byte buffer held by a buffer pool frame.
/// The surrounding `RwLock` is the page latch.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the buffer and detach from any page id
    pub fn reset(&mut self) {
        self.data.fill(0);
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a page; cloning shares the latch and the buffer
pub type PagePtr = Arc<RwLock<Page>>;
