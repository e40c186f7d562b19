use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use super::base::BPlusTree;

/// Structural self-checks used by tests and debug builds. Each walk panics
/// with a description of the first violated invariant:
/// - keys are strictly increasing within every node;
/// - each separator bounds its subtrees (left strictly below, right at or
///   above);
/// - every non-root node is at least half full, no node overflows;
/// - parent pointers match the traversal;
/// - all leaves sit at the same depth and the sibling chain walks them in
///   ascending key order.
impl<K: IndexKey> BPlusTree<K> {
    pub fn verify_integrity(&self) -> Result<(), BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        drop(root_latch);
        if root_id == INVALID_PAGE_ID {
            return Ok(());
        }

        let mut leaves_in_order = Vec::new();
        let mut leaf_depth = None;
        self.verify_subtree(root_id, INVALID_PAGE_ID, None, None, 0, &mut leaf_depth, &mut leaves_in_order)?;

        // The sibling chain from the leftmost leaf must visit exactly the
        // leaves the tree structure reaches, in the same order
        let mut chained = Vec::new();
        let mut current = *leaves_in_order.first().expect("a non-empty tree has a leaf");
        while current != INVALID_PAGE_ID {
            let guard = self.fetch_read(current)?;
            let node: BTreeNode<K> = BTreeNode::decode(guard.data())?;
            assert!(node.is_leaf, "sibling chain reached non-leaf page {}", current);
            chained.push(current);
            current = node.next_page_id;
        }
        assert_eq!(
            chained, leaves_in_order,
            "sibling chain disagrees with tree structure"
        );
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn verify_subtree(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<K>,
        upper: Option<K>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<PageId>,
    ) -> Result<(), BTreeError> {
        let guard = self.fetch_read(page_id)?;
        let node: BTreeNode<K> = BTreeNode::decode(guard.data())?;
        drop(guard);

        assert_eq!(node.page_id, page_id, "page {} stores wrong self id", page_id);
        assert_eq!(
            node.parent_page_id, expected_parent,
            "page {} has a stale parent pointer",
            page_id
        );

        for window in node.keys.windows(2) {
            assert!(window[0] < window[1], "keys out of order on page {}", page_id);
        }
        for key in &node.keys {
            if let Some(lower) = lower {
                assert!(*key >= lower, "key below subtree bound on page {}", page_id);
            }
            if let Some(upper) = upper {
                assert!(*key < upper, "key at or above subtree bound on page {}", page_id);
            }
        }

        let is_root = expected_parent == INVALID_PAGE_ID;
        if node.is_leaf {
            assert!(
                node.keys.len() < node.max_size as usize,
                "leaf {} overflowed",
                page_id
            );
            if !is_root {
                assert!(!node.is_underflow(), "leaf {} below minimum occupancy", page_id);
            }
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) => assert_eq!(depth, expected, "leaf {} at uneven depth", page_id),
            }
            leaves.push(page_id);
            return Ok(());
        }

        assert!(
            node.children.len() <= node.max_size as usize,
            "internal node {} overflowed",
            page_id
        );
        if is_root {
            assert!(node.children.len() >= 2, "internal root {} has a single child", page_id);
        } else {
            assert!(!node.is_underflow(), "internal node {} below minimum occupancy", page_id);
        }

        for (pos, &child) in node.children.iter().enumerate() {
            let child_lower = if pos == 0 { lower } else { Some(node.keys[pos - 1]) };
            let child_upper = if pos == node.keys.len() { upper } else { Some(node.keys[pos]) };
            self.verify_subtree(child, page_id, child_lower, child_upper, depth + 1, leaf_depth, leaves)?;
        }
        Ok(())
    }
}
