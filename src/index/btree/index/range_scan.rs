use std::sync::Arc;
use log::warn;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::{BufferPoolManager, ReadPageGuard};
use super::base::BPlusTree;

/// Forward iterator over leaf entries in key order.
///
/// The iterator pins and read-latches the current leaf; advancing past its
/// last entry hops to the sibling leaf. The current guard is released
/// before the successor is latched, which avoids latch cycles with deletes
/// that take sibling latches right-to-left. The end state is the sentinel
/// (no page, cursor 0).
pub struct IndexIterator<K: IndexKey> {
    buffer_pool: Arc<BufferPoolManager>,
    guard: Option<ReadPageGuard>,
    keys: Vec<K>,
    values: Vec<Rid>,
    next_page_id: PageId,
    cursor: usize,
}

impl<K: IndexKey> IndexIterator<K> {
    fn end(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            guard: None,
            keys: Vec::new(),
            values: Vec::new(),
            next_page_id: INVALID_PAGE_ID,
            cursor: 0,
        }
    }

    fn on_leaf(buffer_pool: Arc<BufferPoolManager>, guard: ReadPageGuard, node: BTreeNode<K>, cursor: usize) -> Self {
        Self {
            buffer_pool,
            guard: Some(guard),
            keys: node.keys,
            values: node.values,
            next_page_id: node.next_page_id,
            cursor,
        }
    }

    pub fn is_end(&self) -> bool {
        self.guard.is_none()
    }
}

impl<K: IndexKey> Iterator for IndexIterator<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            self.guard.as_ref()?;
            if self.cursor < self.keys.len() {
                let item = (self.keys[self.cursor], self.values[self.cursor]);
                self.cursor += 1;
                return Some(item);
            }

            // Hop to the sibling leaf
            self.guard = None;
            self.cursor = 0;
            if self.next_page_id == INVALID_PAGE_ID {
                return None;
            }
            match self.buffer_pool.fetch_page_read(self.next_page_id) {
                Ok(Some(guard)) => match BTreeNode::<K>::decode(guard.data()) {
                    Ok(node) => {
                        self.keys = node.keys;
                        self.values = node.values;
                        self.next_page_id = node.next_page_id;
                        self.guard = Some(guard);
                    }
                    Err(err) => {
                        warn!("stopping index scan: {}", err);
                        return None;
                    }
                },
                Ok(None) | Err(_) => {
                    warn!("stopping index scan: sibling leaf {} unavailable", self.next_page_id);
                    return None;
                }
            }
        }
    }
}

impl<K: IndexKey> BPlusTree<K> {
    /// Iterate from the leftmost leaf
    pub fn iter(&self) -> Result<IndexIterator<K>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(Arc::clone(&self.buffer_pool)));
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(root_latch);

        loop {
            let node: BTreeNode<K> = BTreeNode::decode(guard.data())?;
            if node.is_leaf {
                return Ok(IndexIterator::on_leaf(Arc::clone(&self.buffer_pool), guard, node, 0));
            }
            let child_guard = self.fetch_read(node.children[0])?;
            guard = child_guard;
        }
    }

    /// Iterate starting at the first key >= `key`
    pub fn iter_from(&self, key: &K) -> Result<IndexIterator<K>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(IndexIterator::end(Arc::clone(&self.buffer_pool)));
        }
        let mut guard = self.fetch_read(root_id)?;
        drop(root_latch);

        loop {
            let node: BTreeNode<K> = BTreeNode::decode(guard.data())?;
            if node.is_leaf {
                let cursor = node.keys.partition_point(|k| k < key);
                return Ok(IndexIterator::on_leaf(Arc::clone(&self.buffer_pool), guard, node, cursor));
            }
            let child_guard = self.fetch_read(node.children[node.child_index_for(key)])?;
            guard = child_guard;
        }
    }
}
