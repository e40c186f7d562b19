use std::sync::Arc;

use crate::common::types::{Rid, TableId};
use crate::executor::ExecutionError;
use crate::index::btree::BPlusTree;
use crate::transaction::concurrency::{LockManager, LockMode, Transaction};

/// Insert rows through the primary index: IX on the table, X on every row
/// actually inserted.
pub struct InsertExecutor<'a> {
    txn: &'a Arc<Transaction>,
    lock_manager: &'a Arc<LockManager>,
    index: &'a BPlusTree<i32>,
    table_id: TableId,
}

impl<'a> InsertExecutor<'a> {
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

    /// Returns the number of rows inserted (duplicates are skipped)
    pub fn execute(&self, rows: &[(i32, Rid)]) -> Result<usize, ExecutionError> {
        if !self
            .lock_manager
            .lock_table(self.txn, LockMode::IntentionExclusive, self.table_id)?
        {
            return Err(ExecutionError::LockWaitAborted(self.txn.id()));
        }

        let mut inserted = 0;
        for &(key, rid) in rows {
            if !self.lock_manager.lock_row(self.txn, LockMode::Exclusive, self.table_id, rid)? {
                return Err(ExecutionError::LockWaitAborted(self.txn.id()));
            }
            if self.index.insert(key, rid)? {
                inserted += 1;
            }
            // On a duplicate the row lock is kept: releasing an X lock
            // mid-transaction would start the shrinking phase
        }
        Ok(inserted)
    }
}

/// Delete rows by key: IX on the table, X on every row removed
pub struct DeleteExecutor<'a> {
    txn: &'a Arc<Transaction>,
    lock_manager: &'a Arc<LockManager>,
    index: &'a BPlusTree<i32>,
    table_id: TableId,
}

impl<'a> DeleteExecutor<'a> {
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

    /// Returns the number of rows removed
    pub fn execute(&self, keys: &[i32]) -> Result<usize, ExecutionError> {
        if !self
            .lock_manager
            .lock_table(self.txn, LockMode::IntentionExclusive, self.table_id)?
        {
            return Err(ExecutionError::LockWaitAborted(self.txn.id()));
        }

        let mut removed = 0;
        for key in keys {
            let Some(rid) = self.index.find(key)? else {
                continue;
            };
            if !self.lock_manager.lock_row(self.txn, LockMode::Exclusive, self.table_id, rid)? {
                return Err(ExecutionError::LockWaitAborted(self.txn.id()));
            }
            if self.index.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
