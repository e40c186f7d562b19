use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;
use crate::storage::page::HeaderPageError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),

    #[error("buffer pool exhausted while {0}")]
    PoolExhausted(&'static str),

    #[error("header page error: {0}")]
    Header(#[from] HeaderPageError),

    #[error("corrupted node on page {0}")]
    CorruptedNode(PageId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
