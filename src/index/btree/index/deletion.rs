use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::WritePageGuard;
use super::base::BPlusTree;
use super::insertion::LatchContext;

impl<K: IndexKey> BPlusTree<K> {
    /// Remove a key. Returns false if it was not present.
    ///
    /// Crabbing mirrors insert: ancestors are released once the child is
    /// more than half-full. An underflowing node first tries to
    /// redistribute from a sibling; otherwise the siblings merge, always
    /// keeping the left node, and the shrink propagates upward.
    pub fn remove(&self, key: &K) -> Result<bool, BTreeError> {
        let root_guard = self.root_page_id.write();
        if *root_guard == INVALID_PAGE_ID {
            return Ok(false);
        }

        let mut ctx = LatchContext {
            root_guard: Some(root_guard),
            guards: Vec::new(),
        };
        let mut pending_deletes: Vec<PageId> = Vec::new();

        let root_id = **ctx.root_guard.as_ref().expect("root latch held");
        let mut guard = self.fetch_write(root_id)?;
        let mut node: BTreeNode<K> = BTreeNode::decode(guard.data())?;

        loop {
            if Self::delete_safe(&node, ctx.at_root()) {
                ctx.release_ancestors();
            }
            if node.is_leaf {
                break;
            }
            let child_id = node.children[node.child_index_for(key)];
            let child_guard = self.fetch_write(child_id)?;
            ctx.guards.push(guard);
            guard = child_guard;
            node = BTreeNode::decode(guard.data())?;
        }

        if !node.leaf_remove(key) {
            return Ok(false);
        }

        if node.parent_page_id == INVALID_PAGE_ID {
            // The leaf is the root; an emptied root empties the tree
            if node.size() == 0 {
                pending_deletes.push(node.page_id);
                drop(guard);
                let root_latch = ctx
                    .root_guard
                    .as_mut()
                    .expect("root latch must be held to empty the tree");
                self.persist_root(INVALID_PAGE_ID)?;
                **root_latch = INVALID_PAGE_ID;
            } else {
                node.encode(guard.data_mut());
            }
        } else if !node.is_underflow() {
            node.encode(guard.data_mut());
        } else {
            self.handle_underflow(&mut ctx, node, guard, &mut pending_deletes)?;
        }

        for page_id in pending_deletes {
            // A failed delete only leaves an orphaned page behind
            let _ = self.buffer_pool.delete_page(page_id);
        }
        Ok(true)
    }

    /// Whether a delete passing through `node` can no longer change any
    /// ancestor: more than half-full, or a root that keeps at least one
    /// separator (internal) or entry (leaf) after the operation.
    fn delete_safe(node: &BTreeNode<K>, at_root: bool) -> bool {
        if at_root {
            if node.is_leaf {
                node.size() > 1
            } else {
                node.size() > 2
            }
        } else {
            node.size() > node.min_size()
        }
    }

    /// Fix an underflowing non-root node, walking up the latched ancestor
    /// chain while merges keep shrinking parents.
    fn handle_underflow(
        &self,
        ctx: &mut LatchContext<'_>,
        mut node: BTreeNode<K>,
        mut guard: WritePageGuard,
        pending_deletes: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        loop {
            debug_assert_ne!(node.parent_page_id, INVALID_PAGE_ID);
            let mut parent_guard = ctx
                .guards
                .pop()
                .expect("underflowing node keeps its parent latched");
            let mut parent: BTreeNode<K> = BTreeNode::decode(parent_guard.data())?;
            let pos = parent
                .child_position(node.page_id)
                .expect("node is a child of its latched parent");

            // Redistribute from the left sibling when it can spare an entry
            let mut left_pair = None;
            if pos > 0 {
                let mut left_guard = self.fetch_write(parent.children[pos - 1])?;
                let mut left: BTreeNode<K> = BTreeNode::decode(left_guard.data())?;
                if left.size() > left.min_size() {
                    if node.is_leaf {
                        let moved_key = left.keys.pop().expect("donor leaf is non-empty");
                        let moved_value = left.values.pop().expect("donor leaf is non-empty");
                        node.keys.insert(0, moved_key);
                        node.values.insert(0, moved_value);
                        parent.keys[pos - 1] = moved_key;
                    } else {
                        // Rotate through the parent: the separator comes
                        // down, the donor's last key goes up
                        let moved_child = left.children.pop().expect("donor node has children");
                        let new_separator = left.keys.pop().expect("donor node has keys");
                        node.keys.insert(0, parent.keys[pos - 1]);
                        node.children.insert(0, moved_child);
                        parent.keys[pos - 1] = new_separator;
                        self.set_parent(moved_child, node.page_id)?;
                    }
                    left.encode(left_guard.data_mut());
                    node.encode(guard.data_mut());
                    parent.encode(parent_guard.data_mut());
                    return Ok(());
                }
                left_pair = Some((left, left_guard));
            }

            // Then the right sibling
            let mut right_pair = None;
            if pos + 1 < parent.children.len() {
                let mut right_guard = self.fetch_write(parent.children[pos + 1])?;
                let mut right: BTreeNode<K> = BTreeNode::decode(right_guard.data())?;
                if right.size() > right.min_size() {
                    if node.is_leaf {
                        let moved_key = right.keys.remove(0);
                        let moved_value = right.values.remove(0);
                        node.keys.push(moved_key);
                        node.values.push(moved_value);
                        parent.keys[pos] = right.keys[0];
                    } else {
                        let moved_child = right.children.remove(0);
                        let new_separator = right.keys.remove(0);
                        node.keys.push(parent.keys[pos]);
                        node.children.push(moved_child);
                        parent.keys[pos] = new_separator;
                        self.set_parent(moved_child, node.page_id)?;
                    }
                    right.encode(right_guard.data_mut());
                    node.encode(guard.data_mut());
                    parent.encode(parent_guard.data_mut());
                    return Ok(());
                }
                right_pair = Some((right, right_guard));
            }

            // No sibling can spare an entry: merge, keeping the left node
            if let Some((mut left, mut left_guard)) = left_pair {
                if node.is_leaf {
                    left.keys.append(&mut node.keys);
                    left.values.append(&mut node.values);
                    left.next_page_id = node.next_page_id;
                } else {
                    left.keys.push(parent.keys[pos - 1]);
                    left.keys.append(&mut node.keys);
                    let moved_children = node.children.clone();
                    left.children.append(&mut node.children);
                    for child_id in moved_children {
                        self.set_parent(child_id, left.page_id)?;
                    }
                }
                parent.internal_remove(pos);
                left.encode(left_guard.data_mut());
                pending_deletes.push(node.page_id);
                drop(left_guard);
                drop(guard);
                drop(right_pair);
            } else if let Some((mut right, right_guard)) = right_pair {
                if node.is_leaf {
                    node.keys.append(&mut right.keys);
                    node.values.append(&mut right.values);
                    node.next_page_id = right.next_page_id;
                } else {
                    node.keys.push(parent.keys[pos]);
                    node.keys.append(&mut right.keys);
                    let moved_children = right.children.clone();
                    node.children.append(&mut right.children);
                    for child_id in moved_children {
                        self.set_parent(child_id, node.page_id)?;
                    }
                }
                parent.internal_remove(pos + 1);
                node.encode(guard.data_mut());
                pending_deletes.push(right.page_id);
                drop(right_guard);
                drop(guard);
            } else {
                unreachable!("a non-root node always has at least one sibling");
            }

            if parent.parent_page_id == INVALID_PAGE_ID {
                if parent.children.len() == 1 {
                    // Root collapse: the only remaining child becomes root
                    let new_root_id = parent.children[0];
                    pending_deletes.push(parent.page_id);
                    drop(parent_guard);
                    self.set_parent(new_root_id, INVALID_PAGE_ID)?;
                    let root_latch = ctx
                        .root_guard
                        .as_mut()
                        .expect("root latch must be held for a root collapse");
                    self.persist_root(new_root_id)?;
                    **root_latch = new_root_id;
                } else {
                    parent.encode(parent_guard.data_mut());
                }
                return Ok(());
            }

            parent.encode(parent_guard.data_mut());
            if !parent.is_underflow() {
                return Ok(());
            }
            node = parent;
            guard = parent_guard;
        }
    }
}
