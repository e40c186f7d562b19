pub mod error;
pub mod index;
pub mod key;
pub mod node;

pub use error::BTreeError;
pub use index::{BPlusTree, IndexIterator};
pub use key::IndexKey;
pub use node::BTreeNode;
