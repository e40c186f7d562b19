// Export public modules
pub mod common;
pub mod executor;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::BPlusTree;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolManager;
pub use transaction::concurrency::LockManager;
pub use transaction::concurrency::TransactionManager;
