use std::fs::File;
use std::io::{BufRead, BufReader};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;
use parking_lot::RwLock;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{
    default_internal_max, default_leaf_max, internal_slot_size, leaf_slot_size, BTreeNode,
    LEAF_HEADER_SIZE, NODE_HEADER_SIZE,
};
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::storage::page::{HeaderPage, HEADER_PAGE_ID};

/// B+Tree index over buffer-pool pages: unique keys, ordered iteration,
/// latch-crabbing concurrency.
///
/// The root page id lives behind a tree-wide `RwLock`; structural operations
/// hold the write lock until they prove the root cannot change, so readers
/// linearize with writers at the moment they acquire it. Every page access
/// goes through the pool's read/write guards, keeping pin and latch
/// discipline RAII.
pub struct BPlusTree<K: IndexKey> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: RwLock<PageId>,
    pub(crate) leaf_max_size: u32,
    pub(crate) internal_max_size: u32,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Open or create the index named `index_name`, with node capacities
    /// sized to fill a page.
    pub fn new(index_name: impl Into<String>, buffer_pool: Arc<BufferPoolManager>) -> Result<Self, BTreeError> {
        let leaf_max = default_leaf_max::<K>();
        let internal_max = default_internal_max::<K>();
        Self::with_max_sizes(index_name, buffer_pool, leaf_max, internal_max)
    }

    /// Open or create the index with explicit node capacities (smaller
    /// sizes keep test trees shallow enough to inspect).
    pub fn with_max_sizes(
        index_name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3, "leaf max size too small");
        assert!(internal_max_size >= 3, "internal max size too small");
        assert!(
            LEAF_HEADER_SIZE + leaf_max_size as usize * leaf_slot_size::<K>() <= PAGE_SIZE,
            "leaf max size does not fit a page"
        );
        assert!(
            NODE_HEADER_SIZE + internal_slot_size::<K>() * internal_max_size as usize <= PAGE_SIZE,
            "internal max size does not fit a page"
        );

        let index_name = index_name.into();

        // The root page id is persisted on the header page; register the
        // index there on first open.
        let mut header = buffer_pool
            .fetch_page_write(HEADER_PAGE_ID)?
            .ok_or(BTreeError::PoolExhausted("latching the header page"))?;
        let root_page_id = match HeaderPage::get_root_id(header.data(), &index_name) {
            Some(root) => root,
            None => {
                HeaderPage::insert_record(header.data_mut(), &index_name, INVALID_PAGE_ID)?;
                INVALID_PAGE_ID
            }
        };
        drop(header);

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// Point lookup. Read latches crab down the tree: the parent guard is
    /// released as soon as the child guard is held.
    pub fn find(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(root_latch);

        loop {
            let node: BTreeNode<K> = BTreeNode::decode(guard.data())?;
            if node.is_leaf {
                return Ok(node.leaf_lookup(key));
            }
            let child_id = node.children[node.child_index_for(key)];
            let child_guard = self.fetch_read(child_id)?;
            guard = child_guard;
        }
    }

    /// Record the new root id on the header page. The caller holds the
    /// tree-wide root latch.
    pub(crate) fn persist_root(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let mut header = self
            .buffer_pool
            .fetch_page_write(HEADER_PAGE_ID)?
            .ok_or(BTreeError::PoolExhausted("latching the header page"))?;
        if !HeaderPage::update_root_id(header.data_mut(), &self.index_name, root_page_id) {
            HeaderPage::insert_record(header.data_mut(), &self.index_name, root_page_id)?;
        }
        Ok(())
    }

    pub(crate) fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard, BTreeError> {
        self.buffer_pool
            .fetch_page_read(page_id)?
            .ok_or(BTreeError::PoolExhausted("fetching a node page"))
    }

    pub(crate) fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard, BTreeError> {
        self.buffer_pool
            .fetch_page_write(page_id)?
            .ok_or(BTreeError::PoolExhausted("fetching a node page"))
    }

    pub(crate) fn new_node_page(&self, what: &'static str) -> Result<(PageId, WritePageGuard), BTreeError> {
        self.buffer_pool
            .new_page_write()?
            .ok_or(BTreeError::PoolExhausted(what))
    }

    /// Rewrite a node's parent pointer
    pub(crate) fn set_parent(&self, page_id: PageId, parent_page_id: PageId) -> Result<(), BTreeError> {
        let mut guard = self.fetch_write(page_id)?;
        let mut node: BTreeNode<K> = BTreeNode::decode(guard.data())?;
        node.parent_page_id = parent_page_id;
        node.encode(guard.data_mut());
        Ok(())
    }
}

impl BPlusTree<i32> {
    /// Testing convenience: insert one integer key per line until EOF.
    /// Key `k` maps to `Rid { page_id: k, slot: k }`.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<(), BTreeError> {
        let file = File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(key) = line.trim().parse::<i32>() {
                self.insert(key, Rid::new(key, key as u32))?;
            }
        }
        Ok(())
    }

    /// Testing convenience: remove one integer key per line until EOF
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<(), BTreeError> {
        let file = File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Ok(key) = line.trim().parse::<i32>() {
                self.remove(&key)?;
            }
        }
        Ok(())
    }
}
