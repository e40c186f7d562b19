use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableId, TxnId};
use crate::transaction::concurrency::deadlock;
use crate::transaction::concurrency::transaction::{IsolationLevel, Transaction, TransactionState};

/// How often the background detector scans for deadlocks
pub const CYCLE_DETECTION_INTERVAL: Duration = Duration::from_millis(50);

/// Multi-granularity lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    IntentionShared,
    IntentionExclusive,
    Shared,
    SharedIntentionExclusive,
    Exclusive,
}

impl LockMode {
    /// The (commutative) compatibility matrix
    pub fn compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match (self, other) {
            (IntentionShared, Exclusive) | (Exclusive, IntentionShared) => false,
            (IntentionShared, _) | (_, IntentionShared) => true,
            (IntentionExclusive, IntentionExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Allowed upgrade paths: IS -> {S, X, IX, SIX}; S -> {X, SIX};
    /// IX -> {X, SIX}; SIX -> {X}
    pub fn upgradable_to(self, target: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => matches!(target, Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive),
            Shared | IntentionExclusive => matches!(target, Exclusive | SharedIntentionExclusive),
            SharedIntentionExclusive => matches!(target, Exclusive),
            Exclusive => false,
        }
    }
}

/// Named reasons a lock-manager call aborts a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("lock requested while shrinking")]
    LockOnShrinking,
    #[error("shared lock requested under READ_UNCOMMITTED")]
    LockSharedOnReadUncommitted,
    #[error("intention lock requested on a row")]
    AttemptedIntentionLockOnRow,
    #[error("row lock requested without a suitable table lock")]
    TableLockNotPresent,
    #[error("incompatible lock upgrade")]
    IncompatibleUpgrade,
    #[error("another upgrade is pending on the resource")]
    UpgradeConflict,
    #[error("unlock attempted but no lock held")]
    AttemptedUnlockButNoLockHeld,
    #[error("table unlocked before unlocking its rows")]
    TableUnlockedBeforeUnlockingRows,
}

#[derive(Debug, Error)]
#[error("transaction {txn_id} aborted: {reason}")]
pub struct TransactionAbortError {
    pub txn_id: TxnId,
    pub reason: AbortReason,
}

/// One lock request, granted or still waiting. Holding the transaction
/// handle lets grant evaluation and the deadlock detector observe waiter
/// state without a global registry.
pub(crate) struct LockRequest {
    pub txn: Arc<Transaction>,
    pub mode: LockMode,
    pub oid: TableId,
    pub rid: Option<Rid>,
    pub granted: bool,
}

pub(crate) struct QueueInner {
    /// FIFO request list; granted requests form a compatible prefix
    pub requests: VecDeque<LockRequest>,
    /// Transaction currently upgrading its lock on this resource, if any
    pub upgrading: Option<TxnId>,
}

/// Per-resource request queue. Queues are created on first use and retained
/// for the lifetime of the lock manager so waiters never race a
/// re-creation.
pub(crate) struct LockRequestQueue {
    pub inner: Mutex<QueueInner>,
    pub cv: Condvar,
}

impl Default for LockRequestQueue {
    fn default() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                requests: VecDeque::new(),
                upgrading: None,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Table and row locks in five modes with FIFO queues, lock upgrade and
/// background cycle-based deadlock detection, enforcing strict 2PL under
/// three isolation levels.
pub struct LockManager {
    pub(crate) table_lock_map: Mutex<HashMap<TableId, Arc<LockRequestQueue>>>,
    pub(crate) row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    pub(crate) enable_cycle_detection: AtomicBool,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create the lock manager and start its deadlock-detection thread
    pub fn new(cycle_detection_interval: Duration) -> Arc<Self> {
        let manager = Arc::new(Self {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            enable_cycle_detection: AtomicBool::new(true),
            detector: Mutex::new(None),
        });
        let handle = deadlock::spawn_detector(Arc::downgrade(&manager), cycle_detection_interval);
        *manager.detector.lock() = Some(handle);
        manager
    }

    pub fn new_default() -> Arc<Self> {
        Self::new(CYCLE_DETECTION_INTERVAL)
    }

    /// Acquire (or upgrade to) `mode` on a table. Blocks until granted.
    /// `Ok(false)` means the transaction was aborted while waiting (the
    /// deadlock detector picked it as a victim).
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableId,
    ) -> Result<bool, TransactionAbortError> {
        let _op = txn.op_latch().lock();
        self.lock_resource(txn, mode, oid, None)
    }

    /// Acquire (or upgrade to) `mode` on a row; only S and X are legal
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableId,
        rid: Rid,
    ) -> Result<bool, TransactionAbortError> {
        let _op = txn.op_latch().lock();
        self.lock_resource(txn, mode, oid, Some(rid))
    }

    /// Release a table lock. Fails if the lock is not held or the
    /// transaction still holds row locks on the table.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableId) -> Result<(), TransactionAbortError> {
        let _op = txn.op_latch().lock();

        let Some(mode) = self.held_table_mode(txn, oid) else {
            return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if self.row_lock_exists(txn.id(), oid) {
            return Err(Self::abort(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = self.table_queue(oid);
        {
            let mut q = queue.inner.lock();
            q.requests.retain(|r| r.txn.id() != txn.id());
        }
        queue.cv.notify_all();

        Self::drop_table_lock(txn, mode, oid);
        Self::shrink_on_unlock(txn, mode);
        Ok(())
    }

    /// Release a row lock
    pub fn unlock_row(&self, txn: &Arc<Transaction>, oid: TableId, rid: Rid) -> Result<(), TransactionAbortError> {
        let _op = txn.op_latch().lock();

        let Some(mode) = self.held_row_mode(txn, oid, rid) else {
            return Err(Self::abort(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let queue = self.row_queue(rid);
        {
            let mut q = queue.inner.lock();
            q.requests.retain(|r| r.txn.id() != txn.id());
        }
        queue.cv.notify_all();

        Self::drop_row_lock(txn, mode, oid, rid);
        Self::shrink_on_unlock(txn, mode);
        Ok(())
    }

    // Wrapper forms that swallow the typed abort error, for executors that
    // only need success/failure.

    pub fn try_lock_table(&self, txn: &Arc<Transaction>, mode: LockMode, oid: TableId) -> bool {
        self.lock_table(txn, mode, oid).unwrap_or(false)
    }

    pub fn try_lock_row(&self, txn: &Arc<Transaction>, mode: LockMode, oid: TableId, rid: Rid) -> bool {
        self.lock_row(txn, mode, oid, rid).unwrap_or(false)
    }

    pub fn try_unlock_table(&self, txn: &Arc<Transaction>, oid: TableId) -> bool {
        self.unlock_table(txn, oid).is_ok()
    }

    pub fn try_unlock_row(&self, txn: &Arc<Transaction>, oid: TableId, rid: Rid) -> bool {
        self.unlock_row(txn, oid, rid).is_ok()
    }

    /// Release every lock and pending request of the transaction across
    /// all queues. Used by commit/abort; performs no 2PL state transitions.
    ///
    /// Deliberately does not take the transaction's operation latch: an
    /// abort must be able to unhook a transaction that is blocked inside a
    /// lock call (which holds that latch). The caller flips the state to
    /// ABORTED/COMMITTED first, so the woken waiter bails out on its own.
    pub fn release_all_locks(&self, txn: &Arc<Transaction>) {
        let queues: Vec<Arc<LockRequestQueue>> = {
            let table_map = self.table_lock_map.lock();
            let row_map = self.row_lock_map.lock();
            table_map.values().chain(row_map.values()).cloned().collect()
        };

        for queue in queues {
            let mut q = queue.inner.lock();
            let involved = q.requests.iter().any(|r| r.txn.id() == txn.id());
            q.requests.retain(|r| r.txn.id() != txn.id());
            if q.upgrading == Some(txn.id()) {
                q.upgrading = None;
            }
            drop(q);
            if involved {
                queue.cv.notify_all();
            }
        }

        let mut sets = txn.lock_sets();
        *sets = Default::default();
    }

    /// The blocking acquire path shared by table and row locks. The
    /// caller holds the transaction's operation latch.
    fn lock_resource(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableId,
        rid: Option<Rid>,
    ) -> Result<bool, TransactionAbortError> {
        self.validate_lock_request(txn, mode, oid, rid)?;

        let held = match rid {
            None => self.held_table_mode(txn, oid),
            Some(rid) => self.held_row_mode(txn, oid, rid),
        };
        if held == Some(mode) {
            return Ok(true);
        }
        let upgrade = match held {
            None => false,
            Some(current) => {
                if !current.upgradable_to(mode) {
                    return Err(Self::abort(txn, AbortReason::IncompatibleUpgrade));
                }
                true
            }
        };

        let queue = match rid {
            None => self.table_queue(oid),
            Some(rid) => self.row_queue(rid),
        };

        let mut q = queue.inner.lock();
        if upgrade {
            if q.upgrading.is_some() {
                return Err(Self::abort(txn, AbortReason::UpgradeConflict));
            }
            q.upgrading = Some(txn.id());
            // The old grant makes way for the upgraded request, which jumps
            // ahead of every ungranted waiter
            q.requests.retain(|r| r.txn.id() != txn.id());
            let current = held.expect("upgrade implies a held lock");
            match rid {
                None => Self::drop_table_lock(txn, current, oid),
                Some(rid) => Self::drop_row_lock(txn, current, oid, rid),
            }
            let pos = q
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(q.requests.len());
            q.requests.insert(
                pos,
                LockRequest {
                    txn: Arc::clone(txn),
                    mode,
                    oid,
                    rid,
                    granted: false,
                },
            );
        } else {
            q.requests.push_back(LockRequest {
                txn: Arc::clone(txn),
                mode,
                oid,
                rid,
                granted: false,
            });
        }

        // Wait until every earlier live request is compatible, or the
        // transaction is aborted out from under us.
        loop {
            if txn.state() == TransactionState::Aborted {
                q.requests.retain(|r| r.txn.id() != txn.id());
                if q.upgrading == Some(txn.id()) {
                    q.upgrading = None;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
            if Self::grantable(&q, txn.id()) {
                break;
            }
            queue.cv.wait(&mut q);
        }

        let request = q
            .requests
            .iter_mut()
            .find(|r| r.txn.id() == txn.id())
            .expect("own request is queued");
        request.granted = true;
        if q.upgrading == Some(txn.id()) {
            q.upgrading = None;
        }
        drop(q);

        match rid {
            None => Self::add_table_lock(txn, mode, oid),
            Some(rid) => Self::add_row_lock(txn, mode, oid, rid),
        }
        Ok(true)
    }

    /// FIFO granting rule: a request may be granted iff every earlier live
    /// request is itself granted-or-grantable and compatible with it. The
    /// recursion resolves in one left-to-right pass, which keeps FIFO order
    /// while letting batches of mutually compatible waiters wake together.
    /// Aborted predecessors are ignored; the aborting path removes them
    /// promptly.
    fn grantable(q: &QueueInner, txn_id: TxnId) -> bool {
        let mut earlier_modes: Vec<LockMode> = Vec::new();
        for request in &q.requests {
            if request.txn.state() == TransactionState::Aborted {
                continue;
            }
            let fits = earlier_modes.iter().all(|m| m.compatible_with(request.mode));
            if request.txn.id() == txn_id {
                return fits;
            }
            if !request.granted && !fits {
                // A definitively blocked request blocks everything behind it
                return false;
            }
            earlier_modes.push(request.mode);
        }
        false
    }

    /// Isolation-level and 2PL-state rules checked before queueing
    fn validate_lock_request(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableId,
        rid: Option<Rid>,
    ) -> Result<(), TransactionAbortError> {
        use LockMode::*;

        if txn.isolation_level() == IsolationLevel::ReadUncommitted
            && matches!(mode, Shared | IntentionShared | SharedIntentionExclusive)
        {
            return Err(Self::abort(txn, AbortReason::LockSharedOnReadUncommitted));
        }

        if rid.is_some() && matches!(mode, IntentionShared | IntentionExclusive | SharedIntentionExclusive) {
            return Err(Self::abort(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        if txn.state() == TransactionState::Shrinking {
            if txn.isolation_level() == IsolationLevel::RepeatableRead {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking));
            }
            if matches!(mode, Exclusive | IntentionExclusive | SharedIntentionExclusive) {
                return Err(Self::abort(txn, AbortReason::LockOnShrinking));
            }
        }

        if rid.is_some() {
            let sets = txn.lock_sets();
            let holds_exclusive_class = sets.exclusive_tables.contains(&oid)
                || sets.intention_exclusive_tables.contains(&oid)
                || sets.shared_intention_exclusive_tables.contains(&oid);
            let holds_shared_class =
                sets.shared_tables.contains(&oid) || sets.intention_shared_tables.contains(&oid);
            let ok = match mode {
                Exclusive => holds_exclusive_class,
                Shared => holds_exclusive_class || holds_shared_class,
                _ => unreachable!("intention modes rejected above"),
            };
            if !ok {
                drop(sets);
                return Err(Self::abort(txn, AbortReason::TableLockNotPresent));
            }
        }
        Ok(())
    }

    /// Any row lock of this transaction left on the table's row queues?
    /// Detection scans the queues rather than the bookkeeping.
    fn row_lock_exists(&self, txn_id: TxnId, oid: TableId) -> bool {
        let queues: Vec<Arc<LockRequestQueue>> = self.row_lock_map.lock().values().cloned().collect();
        queues.iter().any(|queue| {
            let q = queue.inner.lock();
            q.requests
                .iter()
                .any(|r| r.granted && r.rid.is_some() && r.txn.id() == txn_id && r.oid == oid)
        })
    }

    fn held_table_mode(&self, txn: &Arc<Transaction>, oid: TableId) -> Option<LockMode> {
        let sets = txn.lock_sets();
        if sets.exclusive_tables.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if sets.shared_intention_exclusive_tables.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if sets.intention_exclusive_tables.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if sets.shared_tables.contains(&oid) {
            Some(LockMode::Shared)
        } else if sets.intention_shared_tables.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else {
            None
        }
    }

    fn held_row_mode(&self, txn: &Arc<Transaction>, oid: TableId, rid: Rid) -> Option<LockMode> {
        let sets = txn.lock_sets();
        if sets.exclusive_rows.get(&oid).is_some_and(|rids| rids.contains(&rid)) {
            Some(LockMode::Exclusive)
        } else if sets.shared_rows.get(&oid).is_some_and(|rids| rids.contains(&rid)) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    fn add_table_lock(txn: &Arc<Transaction>, mode: LockMode, oid: TableId) {
        let mut sets = txn.lock_sets();
        let set = match mode {
            LockMode::Shared => &mut sets.shared_tables,
            LockMode::Exclusive => &mut sets.exclusive_tables,
            LockMode::IntentionShared => &mut sets.intention_shared_tables,
            LockMode::IntentionExclusive => &mut sets.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut sets.shared_intention_exclusive_tables,
        };
        set.insert(oid);
    }

    fn drop_table_lock(txn: &Arc<Transaction>, mode: LockMode, oid: TableId) {
        let mut sets = txn.lock_sets();
        let set = match mode {
            LockMode::Shared => &mut sets.shared_tables,
            LockMode::Exclusive => &mut sets.exclusive_tables,
            LockMode::IntentionShared => &mut sets.intention_shared_tables,
            LockMode::IntentionExclusive => &mut sets.intention_exclusive_tables,
            LockMode::SharedIntentionExclusive => &mut sets.shared_intention_exclusive_tables,
        };
        set.remove(&oid);
    }

    fn add_row_lock(txn: &Arc<Transaction>, mode: LockMode, oid: TableId, rid: Rid) {
        let mut sets = txn.lock_sets();
        let map = match mode {
            LockMode::Shared => &mut sets.shared_rows,
            LockMode::Exclusive => &mut sets.exclusive_rows,
            _ => unreachable!("row locks are S or X"),
        };
        map.entry(oid).or_default().insert(rid);
    }

    fn drop_row_lock(txn: &Arc<Transaction>, mode: LockMode, oid: TableId, rid: Rid) {
        let mut sets = txn.lock_sets();
        let map = match mode {
            LockMode::Shared => &mut sets.shared_rows,
            LockMode::Exclusive => &mut sets.exclusive_rows,
            _ => unreachable!("row locks are S or X"),
        };
        if let Some(rids) = map.get_mut(&oid) {
            rids.remove(&rid);
            if rids.is_empty() {
                map.remove(&oid);
            }
        }
    }

    /// 2PL state transition after an unlock: X always shrinks; S shrinks
    /// only under REPEATABLE_READ; intention modes never change state.
    fn shrink_on_unlock(txn: &Arc<Transaction>, mode: LockMode) {
        if txn.state() != TransactionState::Growing {
            return;
        }
        match mode {
            LockMode::Exclusive => txn.set_state(TransactionState::Shrinking),
            LockMode::Shared => {
                if txn.isolation_level() == IsolationLevel::RepeatableRead {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            _ => {}
        }
    }

    fn abort(txn: &Arc<Transaction>, reason: AbortReason) -> TransactionAbortError {
        // State first, then the typed error
        txn.set_state(TransactionState::Aborted);
        TransactionAbortError {
            txn_id: txn.id(),
            reason,
        }
    }

    fn table_queue(&self, oid: TableId) -> Arc<LockRequestQueue> {
        let mut map = self.table_lock_map.lock();
        Arc::clone(map.entry(oid).or_default())
    }

    fn row_queue(&self, rid: Rid) -> Arc<LockRequestQueue> {
        let mut map = self.row_lock_map.lock();
        Arc::clone(map.entry(rid).or_default())
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.enable_cycle_detection.store(false, Ordering::SeqCst);
        if let Some(handle) = self.detector.get_mut().take() {
            let _ = handle.join();
        }
    }
}
