use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::RawRwLock;

use crate::common::types::{Page, PageId, PagePtr};
use crate::storage::buffer::manager::BufferPoolManager;

type ReadLatch = ArcRwLockReadGuard<RawRwLock, Page>;
type WriteLatch = ArcRwLockWriteGuard<RawRwLock, Page>;

/// RAII pin on a buffer pool page, without a latch.
///
/// Dropping the guard unpins the page with the accumulated dirty bit.
/// `upgrade_read`/`upgrade_write` trade the guard for a latched one while
/// keeping the pin alive.
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Option<PagePtr>,
    page_id: PageId,
    is_dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: PagePtr) -> Self {
        Self {
            bpm,
            page: Some(page),
            page_id,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn page(&self) -> &PagePtr {
        self.page.as_ref().expect("guard already released")
    }

    /// Record that the caller modified the page; applied at unpin time
    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    /// Acquire the shared latch, preserving the pin
    pub fn upgrade_read(mut self) -> ReadPageGuard {
        let page = self.page.take().expect("guard already released");
        ReadPageGuard {
            bpm: Arc::clone(&self.bpm),
            page_id: self.page_id,
            is_dirty: self.is_dirty,
            latch: Some(page.read_arc()),
        }
    }

    /// Acquire the exclusive latch, preserving the pin
    pub fn upgrade_write(mut self) -> WritePageGuard {
        let page = self.page.take().expect("guard already released");
        WritePageGuard {
            bpm: Arc::clone(&self.bpm),
            page_id: self.page_id,
            is_dirty: self.is_dirty,
            latch: Some(page.write_arc()),
        }
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        if self.page.take().is_some() {
            self.bpm.unpin_page(self.page_id, self.is_dirty);
        }
    }
}

/// RAII pin plus shared latch on a page.
/// Drop order: latch first, then pin.
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    is_dirty: bool,
    latch: Option<ReadLatch>,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: &PagePtr, is_dirty: bool) -> Self {
        Self {
            bpm,
            page_id,
            is_dirty,
            latch: Some(page.read_arc()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.deref().data
    }
}

impl Deref for ReadPageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("guard already released")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch before pin: once the pin drops the frame may be evicted and
        // the latch re-acquired for an unrelated page.
        self.latch.take();
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// RAII pin plus exclusive latch on a page. Any mutable access marks the
/// page dirty. Drop order: latch first, then pin.
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    is_dirty: bool,
    latch: Option<WriteLatch>,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, page: &PagePtr, is_dirty: bool) -> Self {
        Self {
            bpm,
            page_id,
            is_dirty,
            latch: Some(page.write_arc()),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn data(&self) -> &[u8] {
        &self.deref().data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.deref_mut().data
    }
}

impl Deref for WritePageGuard {
    type Target = Page;

    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("guard already released")
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut Page {
        self.is_dirty = true;
        self.latch.as_mut().expect("guard already released")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}
