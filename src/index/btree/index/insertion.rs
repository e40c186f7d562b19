use parking_lot::RwLockWriteGuard;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::WritePageGuard;
use super::base::BPlusTree;

/// Latches collected while crabbing down the tree: the tree-wide root latch
/// plus the write guards of every ancestor that is not yet proven safe.
pub(crate) struct LatchContext<'a> {
    pub root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    pub guards: Vec<WritePageGuard>,
}

impl LatchContext<'_> {
    /// The operation is safe at the current node: every ancestor latch
    /// (and the root latch) can go.
    pub fn release_ancestors(&mut self) {
        self.guards.clear();
        self.root_guard = None;
    }

    /// Whether the node about to be examined is the root (no latched
    /// ancestors, root latch still held)
    pub fn at_root(&self) -> bool {
        self.guards.is_empty() && self.root_guard.is_some()
    }
}

impl<K: IndexKey> BPlusTree<K> {
    /// Insert a unique key. Returns false if the key is already present.
    ///
    /// Write latches crab downward: ancestors are released once the child
    /// cannot split (it is not full). A split posts the right sibling's
    /// first key to the parent, walking back up the still-latched chain.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool, BTreeError> {
        let mut root_guard = self.root_page_id.write();

        if *root_guard == INVALID_PAGE_ID {
            // Empty tree: the new leaf becomes the root
            let (page_id, mut guard) = self.new_node_page("allocating the root leaf")?;
            let mut root = BTreeNode::new_leaf(page_id, INVALID_PAGE_ID, self.leaf_max_size);
            root.leaf_insert(key, rid);
            root.encode(guard.data_mut());
            drop(guard);
            self.persist_root(page_id)?;
            *root_guard = page_id;
            return Ok(true);
        }

        let mut ctx = LatchContext {
            root_guard: Some(root_guard),
            guards: Vec::new(),
        };

        let root_id = **ctx.root_guard.as_ref().expect("root latch held");
        let mut guard = self.fetch_write(root_id)?;
        let mut node: BTreeNode<K> = BTreeNode::decode(guard.data())?;

        loop {
            if !node.is_full() {
                ctx.release_ancestors();
            }
            if node.is_leaf {
                break;
            }
            let child_id = node.children[node.child_index_for(&key)];
            let child_guard = self.fetch_write(child_id)?;
            ctx.guards.push(guard);
            guard = child_guard;
            node = BTreeNode::decode(guard.data())?;
        }

        if node.leaf_lookup(&key).is_some() {
            return Ok(false);
        }

        if !node.is_full() {
            node.leaf_insert(key, rid);
            node.encode(guard.data_mut());
            return Ok(true);
        }

        // Leaf split: the overflowed entry set divides so that the first
        // ceil(max/2) entries stay left and the rest move right; the right
        // node's first key is posted to the parent.
        node.leaf_insert(key, rid);
        let (right_id, mut right_guard) = self.new_node_page("splitting a leaf")?;
        let right = node.split_leaf(right_id);
        let separator = right.keys[0];
        let left_id = node.page_id;
        node.encode(guard.data_mut());
        right.encode(right_guard.data_mut());
        drop(right_guard);
        drop(guard);

        self.insert_into_parent(&mut ctx, left_id, separator, right_id)?;
        Ok(true)
    }

    /// Post `(separator, right_id)` into the parent of `left_id`, splitting
    /// ancestors as needed. The ancestor chain is still write-latched in
    /// `ctx`, so walking upward is race-free.
    fn insert_into_parent(
        &self,
        ctx: &mut LatchContext<'_>,
        left_id: PageId,
        separator: K,
        right_id: PageId,
    ) -> Result<(), BTreeError> {
        if ctx.guards.is_empty() {
            // `left_id` was the root: grow a new root above it
            let (new_root_id, mut root_page_guard) = self.new_node_page("growing a new root")?;
            let mut new_root = BTreeNode::new_internal(new_root_id, INVALID_PAGE_ID, self.internal_max_size);
            new_root.children.push(left_id);
            new_root.internal_insert(separator, right_id);
            new_root.encode(root_page_guard.data_mut());
            drop(root_page_guard);

            self.set_parent(left_id, new_root_id)?;
            self.set_parent(right_id, new_root_id)?;

            let root_latch = ctx
                .root_guard
                .as_mut()
                .expect("root latch must be held when the root splits");
            self.persist_root(new_root_id)?;
            **root_latch = new_root_id;
            return Ok(());
        }

        let mut parent_guard = ctx.guards.pop().expect("checked non-empty");
        let mut parent: BTreeNode<K> = BTreeNode::decode(parent_guard.data())?;
        debug_assert!(!parent.is_leaf);

        if !parent.is_full() {
            parent.internal_insert(separator, right_id);
            parent.encode(parent_guard.data_mut());
            return Ok(());
        }

        // Internal split: elevate the middle key; children moved to the new
        // right node have their parent pointers rewritten.
        parent.internal_insert(separator, right_id);
        let (new_right_id, mut new_right_guard) = self.new_node_page("splitting an internal node")?;
        let (up_key, new_right) = parent.split_internal(new_right_id);
        let parent_id = parent.page_id;
        let moved_children = new_right.children.clone();
        parent.encode(parent_guard.data_mut());
        new_right.encode(new_right_guard.data_mut());
        drop(new_right_guard);
        drop(parent_guard);

        for child_id in moved_children {
            self.set_parent(child_id, new_right_id)?;
        }

        self.insert_into_parent(ctx, parent_id, up_key, new_right_id)
    }
}
