//! Minimal executors showing how query operators drive the buffer pool,
//! index, lock manager and transaction bookkeeping together. Real
//! executors live above this crate; these exist to pin down the
//! interaction contract and are exercised by the integration tests.

pub mod dml;
pub mod scan;

use thiserror::Error;

use crate::common::types::TxnId;
use crate::index::btree::BTreeError;
use crate::transaction::concurrency::TransactionAbortError;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("index error: {0}")]
    Index(#[from] BTreeError),

    #[error("transaction {0} aborted while waiting for a lock")]
    LockWaitAborted(TxnId),

    #[error(transparent)]
    Aborted(#[from] TransactionAbortError),
}

pub use dml::{DeleteExecutor, InsertExecutor};
pub use scan::SeqScanExecutor;
