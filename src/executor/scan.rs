use std::sync::Arc;

use crate::common::types::{Rid, TableId};
use crate::executor::ExecutionError;
use crate::index::btree::BPlusTree;
use crate::transaction::concurrency::{IsolationLevel, LockManager, LockMode, Transaction};

/// Sequential scan through a table's primary index: IS on the table, S on
/// every row touched. READ_UNCOMMITTED takes no shared locks at all;
/// READ_COMMITTED drops each row lock as soon as the row is produced.
pub struct SeqScanExecutor<'a> {
    txn: &'a Arc<Transaction>,
    lock_manager: &'a Arc<LockManager>,
    index: &'a BPlusTree<i32>,
    table_id: TableId,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(
        txn: &'a Arc<Transaction>,
        lock_manager: &'a Arc<LockManager>,
        index: &'a BPlusTree<i32>,
        table_id: TableId,
    ) -> Self {
        Self {
            txn,
            lock_manager,
            index,
            table_id,
        }
    }

    pub fn execute(&self) -> Result<Vec<(i32, Rid)>, ExecutionError> {
        let takes_shared_locks = self.txn.isolation_level() != IsolationLevel::ReadUncommitted;

        if takes_shared_locks
            && !self
                .lock_manager
                .lock_table(self.txn, LockMode::IntentionShared, self.table_id)?
        {
            return Err(ExecutionError::LockWaitAborted(self.txn.id()));
        }

        // Drain the iterator before taking row locks: a lock wait must not
        // block while leaf pages are still latched.
        let rows: Vec<(i32, Rid)> = self.index.iter()?.collect();

        if takes_shared_locks {
            for &(_, rid) in &rows {
                if !self
                    .lock_manager
                    .lock_row(self.txn, LockMode::Shared, self.table_id, rid)?
                {
                    return Err(ExecutionError::LockWaitAborted(self.txn.id()));
                }
                if self.txn.isolation_level() == IsolationLevel::ReadCommitted {
                    // Under READ_COMMITTED the shared lock only covers the
                    // read itself
                    let _ = self.lock_manager.unlock_row(self.txn, self.table_id, rid);
                }
            }
        }
        Ok(rows)
    }
}
