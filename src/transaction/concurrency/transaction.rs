use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU8, Ordering};
use parking_lot::{Mutex, MutexGuard};

use crate::common::types::{Rid, TableId, TxnId};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states. The machine only moves forward:
/// GROWING -> SHRINKING -> (COMMITTED | ABORTED).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

impl TransactionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Growing,
            1 => Self::Shrinking,
            2 => Self::Committed,
            _ => Self::Aborted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Growing => 0,
            Self::Shrinking => 1,
            Self::Committed => 2,
            Self::Aborted => 3,
        }
    }
}

/// Per-transaction record of the locks it holds: one table set per mode and
/// S/X row maps keyed by table.
#[derive(Debug, Default)]
pub struct LockSets {
    pub shared_tables: HashSet<TableId>,
    pub exclusive_tables: HashSet<TableId>,
    pub intention_shared_tables: HashSet<TableId>,
    pub intention_exclusive_tables: HashSet<TableId>,
    pub shared_intention_exclusive_tables: HashSet<TableId>,
    pub shared_rows: HashMap<TableId, HashSet<Rid>>,
    pub exclusive_rows: HashMap<TableId, HashSet<Rid>>,
}

/// An active transaction: id, isolation level, 2PL state and lock
/// bookkeeping.
///
/// The state is an atomic so the deadlock detector can mark a victim
/// ABORTED while the victim blocks on a lock queue. The `op_latch` is held
/// across every lock-manager public operation on this transaction to
/// serialize concurrent callers; the bookkeeping has its own short-lived
/// mutex.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: AtomicU8,
    op_latch: Mutex<()>,
    lock_sets: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: AtomicU8::new(TransactionState::Growing.as_u8()),
            op_latch: Mutex::new(()),
            lock_sets: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        TransactionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: TransactionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn op_latch(&self) -> &Mutex<()> {
        &self.op_latch
    }

    pub fn lock_sets(&self) -> MutexGuard<'_, LockSets> {
        self.lock_sets.lock()
    }

    /// Number of locks currently recorded, across all granularities
    pub fn lock_count(&self) -> usize {
        let sets = self.lock_sets.lock();
        sets.shared_tables.len()
            + sets.exclusive_tables.len()
            + sets.intention_shared_tables.len()
            + sets.intention_exclusive_tables.len()
            + sets.shared_intention_exclusive_tables.len()
            + sets.shared_rows.values().map(HashSet::len).sum::<usize>()
            + sets.exclusive_rows.values().map(HashSet::len).sum::<usize>()
    }
}
