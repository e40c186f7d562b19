use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::LockManager;
use crate::transaction::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};

/// Creates and tracks transactions; commit and abort release whatever locks
/// the transaction still holds.
pub struct TransactionManager {
    next_txn_id: AtomicU32,
    lock_manager: Arc<LockManager>,
    active_transactions: Mutex<HashMap<TxnId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(lock_manager: Arc<LockManager>) -> Self {
        Self {
            next_txn_id: AtomicU32::new(1),
            lock_manager,
            active_transactions: Mutex::new(HashMap::new()),
        }
    }

    pub fn lock_manager(&self) -> &Arc<LockManager> {
        &self.lock_manager
    }

    /// Begin a transaction at the given isolation level
    pub fn begin(&self, isolation_level: IsolationLevel) -> Arc<Transaction> {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(txn_id, isolation_level));
        self.active_transactions.lock().insert(txn_id, Arc::clone(&txn));
        txn
    }

    /// Commit: under strict 2PL every lock is released here. Returns false
    /// if the transaction was already aborted (e.g. a deadlock victim).
    pub fn commit(&self, txn: &Arc<Transaction>) -> bool {
        if txn.state() == TransactionState::Aborted {
            return false;
        }
        txn.set_state(TransactionState::Committed);
        self.lock_manager.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
        true
    }

    /// Abort: flips the state so any pending lock wait bails out, then
    /// releases every lock still held.
    pub fn abort(&self, txn: &Arc<Transaction>) {
        txn.set_state(TransactionState::Aborted);
        self.lock_manager.release_all_locks(txn);
        self.active_transactions.lock().remove(&txn.id());
    }

    pub fn transaction_exists(&self, txn_id: TxnId) -> bool {
        self.active_transactions.lock().contains_key(&txn_id)
    }

    pub fn active_transaction_ids(&self) -> Vec<TxnId> {
        self.active_transactions.lock().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TransactionManager {
        TransactionManager::new(LockManager::new_default())
    }

    #[test]
    fn test_begin_assigns_monotonic_ids() {
        let tm = manager();
        let t1 = tm.begin(IsolationLevel::ReadCommitted);
        let t2 = tm.begin(IsolationLevel::RepeatableRead);
        assert_eq!(t1.id(), 1);
        assert_eq!(t2.id(), 2);
        assert!(tm.transaction_exists(1));
        assert!(tm.transaction_exists(2));
        assert_eq!(t1.state(), TransactionState::Growing);
    }

    #[test]
    fn test_commit_releases_and_untracks() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        assert!(tm
            .lock_manager()
            .lock_table(&txn, crate::transaction::concurrency::LockMode::Shared, 1)
            .unwrap());
        assert_eq!(txn.lock_count(), 1);

        assert!(tm.commit(&txn));
        assert_eq!(txn.state(), TransactionState::Committed);
        assert_eq!(txn.lock_count(), 0);
        assert!(!tm.transaction_exists(txn.id()));
    }

    #[test]
    fn test_abort_releases_locks() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::RepeatableRead);
        let lm = tm.lock_manager().clone();
        assert!(lm
            .lock_table(&txn, crate::transaction::concurrency::LockMode::Exclusive, 7)
            .unwrap());

        tm.abort(&txn);
        assert_eq!(txn.state(), TransactionState::Aborted);
        assert_eq!(txn.lock_count(), 0);

        // The lock is free again for another transaction
        let other = tm.begin(IsolationLevel::RepeatableRead);
        assert!(lm
            .lock_table(&other, crate::transaction::concurrency::LockMode::Exclusive, 7)
            .unwrap());
    }

    #[test]
    fn test_commit_after_abort_fails() {
        let tm = manager();
        let txn = tm.begin(IsolationLevel::ReadCommitted);
        tm.abort(&txn);
        assert!(!tm.commit(&txn));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }
}
