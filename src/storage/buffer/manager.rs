use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use log::debug;
use parking_lot::Mutex;

use crate::common::types::{FrameId, Page, PagePtr, PageId, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_guard::{PageGuard, ReadPageGuard, WritePageGuard};
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::hash::ExtendibleHashTable;

const PAGE_TABLE_BUCKET_SIZE: usize = 8;
const DEFAULT_REPLACER_K: usize = 2;

/// Per-frame metadata, guarded by the pool latch
#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

struct PoolInner {
    frames: Vec<FrameMeta>,
    free_list: VecDeque<FrameId>,
}

/// The buffer pool: owns `pool_size` frames, the page table mapping resident
/// page ids to frames, the free list and the LRU-K replacer.
///
/// One coarse mutex (`inner`) serializes the public operations; fine-grained
/// latching lives on the individual pages. Latching discipline: the pool
/// latch is never held while blocking on a page latch (install-time latch
/// acquisitions target frames no other thread can reference), and disk reads
/// for a fetched page happen after the pool latch is released, with the
/// frame pinned and its page latch held.
pub struct BufferPoolManager {
    pool_size: usize,
    /// Page buffers + latches, one per frame, fixed at construction
    pages: Vec<PagePtr>,
    inner: Mutex<PoolInner>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_manager: Arc<DiskManager>,
    next_page_id: AtomicI32,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, DEFAULT_REPLACER_K, disk_manager))
    }

    pub fn with_disk_manager(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            pages.push(Arc::new(parking_lot::RwLock::new(Page::new(INVALID_PAGE_ID))));
            frames.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            pages,
            inner: Mutex::new(PoolInner { frames, free_list }),
            page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk_manager,
            // Page id 0 is reserved for the header page; allocation starts
            // past it
            next_page_id: AtomicI32::new(1),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it in a frame. Returns `None` when every
    /// frame is pinned (the caller may retry after releasing pins).
    pub fn new_page(&self) -> Result<Option<(PageId, PagePtr)>, BufferPoolError> {
        let mut inner = self.inner.lock();
        let Some(frame_id) = self.allocate_frame(&mut inner)? else {
            return Ok(None);
        };

        let page_id = self.next_page_id.fetch_add(1, Ordering::SeqCst);
        let meta = &mut inner.frames[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        // The frame came off the free list or was evicted, so no other
        // thread holds its latch: this write cannot block.
        {
            let mut page = self.pages[frame_id].write();
            page.reset();
            page.page_id = page_id;
        }

        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(Some((page_id, Arc::clone(&self.pages[frame_id]))))
    }

    /// Fetch a page, reading it from disk on a miss. Returns `None` when no
    /// frame can be freed.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<PagePtr>, BufferPoolError> {
        assert_ne!(page_id, INVALID_PAGE_ID, "fetching the invalid page id");
        let mut inner = self.inner.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            inner.frames[frame_id].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Some(Arc::clone(&self.pages[frame_id])));
        }

        let Some(frame_id) = self.allocate_frame(&mut inner)? else {
            return Ok(None);
        };

        let meta = &mut inner.frames[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;
        self.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        // Hold the (uncontended) page latch across the disk read so the pool
        // latch can be released before I/O. Threads that fetch the same page
        // concurrently will pin it and then block on this latch until the
        // read completes.
        let page_ptr = Arc::clone(&self.pages[frame_id]);
        let mut page = page_ptr.write();
        drop(inner);

        page.page_id = page_id;
        if let Err(err) = self.disk_manager.read_page(page_id, &mut page.data) {
            page.reset();
            drop(page);
            self.discard_failed_fetch(page_id, frame_id);
            return Err(err.into());
        }
        drop(page);

        Ok(Some(page_ptr))
    }

    /// Drop the pin on a page, OR-ing in the dirty flag. Returns false if
    /// the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut inner = self.inner.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return false;
        };

        let meta = &mut inner.frames[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        if is_dirty {
            // Dirty is sticky: only flush clears it
            meta.is_dirty = true;
        }
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Write a page through to disk unconditionally and clear its dirty
    /// flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        assert_ne!(page_id, INVALID_PAGE_ID, "flushing the invalid page id");

        // Pin the frame so it cannot be evicted while we write, then do the
        // I/O without the pool latch.
        let frame_id = {
            let mut inner = self.inner.lock();
            let Some(frame_id) = self.page_table.find(&page_id) else {
                return Ok(false);
            };
            inner.frames[frame_id].pin_count += 1;
            self.replacer.set_evictable(frame_id, false);
            frame_id
        };

        let data = self.pages[frame_id].read().data;
        let write_result = self.disk_manager.write_page(page_id, &data);

        let mut inner = self.inner.lock();
        let meta = &mut inner.frames[frame_id];
        meta.pin_count -= 1;
        match write_result {
            // Write first, then clear: a failed write must leave the frame
            // dirty so the update is not lost.
            Ok(()) => meta.is_dirty = false,
            Err(err) => {
                if meta.pin_count == 0 {
                    self.replacer.set_evictable(frame_id, true);
                }
                return Err(err.into());
            }
        }
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        Ok(true)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let resident: Vec<PageId> = {
            let inner = self.inner.lock();
            inner
                .frames
                .iter()
                .map(|meta| meta.page_id)
                .filter(|&page_id| page_id != INVALID_PAGE_ID)
                .collect()
        };
        for page_id in resident {
            self.flush_page(page_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and tell the disk manager its id is free.
    /// Returns true if the page is gone (including "was never resident"),
    /// false if it is still pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool, BufferPoolError> {
        let mut inner = self.inner.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(true);
        };
        if inner.frames[frame_id].pin_count > 0 {
            return Ok(false);
        }

        self.replacer.remove(frame_id);
        self.page_table.remove(&page_id);
        inner.frames[frame_id].reset();
        self.pages[frame_id].write().reset();
        inner.free_list.push_back(frame_id);
        drop(inner);

        self.disk_manager.deallocate_page(page_id);
        Ok(true)
    }

    /// Pick a frame for a new occupant: free list first, else evict. The
    /// victim's dirty contents are written back before the frame is handed
    /// out. The victim is unpinned by definition, so nobody holds its latch
    /// and the write-back cannot block other I/O on the same frame.
    fn allocate_frame(&self, inner: &mut PoolInner) -> Result<Option<FrameId>, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(Some(frame_id));
        }

        let Some(frame_id) = self.replacer.evict() else {
            return Ok(None);
        };
        let meta = &mut inner.frames[frame_id];
        debug_assert_eq!(meta.pin_count, 0, "replacer evicted a pinned frame");

        if meta.is_dirty {
            debug!("evicting dirty page {} from frame {}", meta.page_id, frame_id);
            let data = self.pages[frame_id].read().data;
            self.disk_manager.write_page(meta.page_id, &data)?;
            meta.is_dirty = false;
        }
        if meta.page_id != INVALID_PAGE_ID {
            self.page_table.remove(&meta.page_id);
        }
        meta.reset();
        Ok(Some(frame_id))
    }

    /// Undo the bookkeeping of a fetch whose disk read failed
    fn discard_failed_fetch(&self, page_id: PageId, frame_id: FrameId) {
        let mut inner = self.inner.lock();
        if inner.frames[frame_id].pin_count > 1 {
            // Another thread pinned the page while the read was in flight;
            // it keeps the (zeroed) frame, we only drop our pin
            inner.frames[frame_id].pin_count -= 1;
            return;
        }
        inner.frames[frame_id].reset();
        self.page_table.remove(&page_id);
        self.replacer.set_evictable(frame_id, true);
        self.replacer.remove(frame_id);
        inner.free_list.push_back(frame_id);
    }
}

// Guard-producing constructors. Guards carry an `Arc` back to the pool so
// they stay movable and self-contained.
impl BufferPoolManager {
    /// `new_page` wrapped in a write guard: pinned, exclusively latched,
    /// marked dirty on first mutable access
    pub fn new_page_write(self: &Arc<Self>) -> Result<Option<(PageId, WritePageGuard)>, BufferPoolError> {
        let Some((page_id, page)) = self.new_page()? else {
            return Ok(None);
        };
        Ok(Some((page_id, WritePageGuard::new(Arc::clone(self), page_id, &page, false))))
    }

    /// Fetch holding only a pin
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Result<Option<PageGuard>, BufferPoolError> {
        let Some(page) = self.fetch_page(page_id)? else {
            return Ok(None);
        };
        Ok(Some(PageGuard::new(Arc::clone(self), page_id, page)))
    }

    /// Fetch holding a pin and the shared page latch
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<Option<ReadPageGuard>, BufferPoolError> {
        let Some(page) = self.fetch_page(page_id)? else {
            return Ok(None);
        };
        Ok(Some(ReadPageGuard::new(Arc::clone(self), page_id, &page, false)))
    }

    /// Fetch holding a pin and the exclusive page latch
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<Option<WritePageGuard>, BufferPoolError> {
        let Some(page) = self.fetch_page(page_id)? else {
            return Ok(None);
        };
        Ok(Some(WritePageGuard::new(Arc::clone(self), page_id, &page, false)))
    }
}
