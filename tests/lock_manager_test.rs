use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kestreldb::common::types::Rid;
use kestreldb::transaction::concurrency::{
    AbortReason, IsolationLevel, LockManager, LockMode, TransactionManager, TransactionState,
};

fn setup() -> (Arc<LockManager>, TransactionManager) {
    let lock_manager = LockManager::new_default();
    let txn_manager = TransactionManager::new(Arc::clone(&lock_manager));
    (lock_manager, txn_manager)
}

const TABLE_A: u32 = 1;
const TABLE_B: u32 = 2;

// Writers queue behind a shared lock; releasing it hands the exclusive
// lock over and moves the releasing transaction to SHRINKING.
#[test]
fn test_shared_then_exclusive_handover() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap());

    let waiter = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A).unwrap())
    };

    // Give the writer time to queue up behind the shared lock
    thread::sleep(Duration::from_millis(200));
    assert!(!waiter.is_finished());

    lm.unlock_table(&t1, TABLE_A).unwrap();
    assert_eq!(t1.state(), TransactionState::Shrinking);

    assert!(waiter.join().unwrap());
    assert_eq!(t2.state(), TransactionState::Growing);

    // Once shrinking under REPEATABLE_READ, no lock may be acquired
    let err = lm.lock_table(&t1, LockMode::Shared, TABLE_B).unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
    assert_eq!(t1.state(), TransactionState::Aborted);
}

// Row locks must be released before their table lock; intention unlocks do
// not shrink the transaction.
#[test]
fn test_table_unlock_blocked_by_row_locks() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::ReadCommitted);
    let row = Rid::new(3, 7);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A).unwrap());
    assert!(lm.lock_row(&t1, LockMode::Shared, TABLE_A, row).unwrap());

    let err = lm.unlock_table(&t1, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableUnlockedBeforeUnlockingRows);

    // The transaction was aborted by the illegal unlock; start over and do
    // it in the right order
    let t2 = tm.begin(IsolationLevel::ReadCommitted);
    assert!(lm.lock_table(&t2, LockMode::IntentionShared, TABLE_A).unwrap());
    assert!(lm.lock_row(&t2, LockMode::Shared, TABLE_A, row).unwrap());
    lm.unlock_row(&t2, TABLE_A, row).unwrap();
    lm.unlock_table(&t2, TABLE_A).unwrap();

    // Unlocking S under READ_COMMITTED and IS anywhere never shrinks
    assert_eq!(t2.state(), TransactionState::Growing);
}

// Classic cross-table deadlock: the detector aborts the youngest
// transaction in the cycle and the survivor proceeds.
#[test]
fn test_deadlock_detection_aborts_youngest() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap());
    assert!(lm.lock_table(&t2, LockMode::Exclusive, TABLE_B).unwrap());

    let h1 = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE_B).unwrap())
    };
    let h2 = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A).unwrap())
    };

    // t2 has the higher id: it must be the victim
    let r1 = h1.join().unwrap();
    let r2 = h2.join().unwrap();
    assert!(r1);
    assert!(!r2);
    assert_eq!(t1.state(), TransactionState::Growing);
    assert_eq!(t2.state(), TransactionState::Aborted);
}

#[test]
fn test_lock_upgrade_priority() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap());
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_A).unwrap());

    // t3 queues for X behind both shared holders
    let x_waiter = {
        let lm = Arc::clone(&lm);
        let t3 = Arc::clone(&t3);
        thread::spawn(move || lm.lock_table(&t3, LockMode::Exclusive, TABLE_A).unwrap())
    };
    thread::sleep(Duration::from_millis(100));

    // t1 upgrades S -> X: the upgrade jumps ahead of t3 but still waits
    // for t2's shared lock
    let upgrader = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!upgrader.is_finished());
    assert!(!x_waiter.is_finished());

    lm.unlock_table(&t2, TABLE_A).unwrap();

    // The upgrader wins despite queueing later than t3
    assert!(upgrader.join().unwrap());
    assert!(!x_waiter.is_finished());

    lm.unlock_table(&t1, TABLE_A).unwrap();
    assert!(x_waiter.join().unwrap());
}

#[test]
fn test_incompatible_upgrade_rejected() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap());
    let err = lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::IncompatibleUpgrade);
    assert_eq!(t1.state(), TransactionState::Aborted);
}

#[test]
fn test_concurrent_upgrades_conflict() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap());
    assert!(lm.lock_table(&t2, LockMode::Shared, TABLE_A).unwrap());
    assert!(lm.lock_table(&t3, LockMode::Shared, TABLE_A).unwrap());

    // t1's upgrade waits on the other shared holders
    let upgrader = {
        let lm = Arc::clone(&lm);
        let t1 = Arc::clone(&t1);
        thread::spawn(move || lm.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap())
    };
    thread::sleep(Duration::from_millis(100));
    assert!(!upgrader.is_finished());

    // A second simultaneous upgrade on the same queue must fail
    let err = lm.lock_table(&t2, LockMode::Exclusive, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::UpgradeConflict);
    assert_eq!(t2.state(), TransactionState::Aborted);

    // The aborted holder's lock is cleaned up, letting the upgrade through
    tm.abort(&t2);
    lm.unlock_table(&t3, TABLE_A).unwrap();
    assert!(upgrader.join().unwrap());
}

#[test]
fn test_same_mode_relock_is_idempotent() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A).unwrap());
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A).unwrap());
    assert_eq!(t1.lock_count(), 1);

    lm.unlock_table(&t1, TABLE_A).unwrap();
    assert_eq!(t1.lock_count(), 0);

    // Unlock followed by the same lock re-establishes identical bookkeeping
    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_A).unwrap());
    assert_eq!(t1.lock_count(), 1);
}

#[test]
fn test_read_uncommitted_rejects_shared_modes() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::ReadUncommitted);

    for mode in [LockMode::Shared, LockMode::IntentionShared, LockMode::SharedIntentionExclusive] {
        let txn = tm.begin(IsolationLevel::ReadUncommitted);
        let err = lm.lock_table(&txn, mode, TABLE_A).unwrap_err();
        assert_eq!(err.reason, AbortReason::LockSharedOnReadUncommitted);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    // IX and X remain legal
    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A).unwrap());
}

#[test]
fn test_row_lock_rules() {
    let (lm, tm) = setup();
    let row = Rid::new(5, 1);

    // Intention modes are not legal on rows
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t1, LockMode::IntentionExclusive, TABLE_A).unwrap());
    let err = lm.lock_row(&t1, LockMode::IntentionShared, TABLE_A, row).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedIntentionLockOnRow);

    // Row X requires a table X/IX/SIX
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t2, LockMode::IntentionShared, TABLE_A).unwrap());
    let err = lm.lock_row(&t2, LockMode::Exclusive, TABLE_A, row).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);

    // Row S under table IS is fine
    let t3 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.lock_table(&t3, LockMode::IntentionShared, TABLE_A).unwrap());
    assert!(lm.lock_row(&t3, LockMode::Shared, TABLE_A, row).unwrap());

    // No table lock at all: row S is rejected too
    let t4 = tm.begin(IsolationLevel::RepeatableRead);
    let err = lm.lock_row(&t4, LockMode::Shared, TABLE_A, row).unwrap_err();
    assert_eq!(err.reason, AbortReason::TableLockNotPresent);
}

#[test]
fn test_unlock_without_lock_fails() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);

    let err = lm.unlock_table(&t1, TABLE_A).unwrap_err();
    assert_eq!(err.reason, AbortReason::AttemptedUnlockButNoLockHeld);
    assert_eq!(t1.state(), TransactionState::Aborted);
}

// FIFO fairness: a shared request behind a waiting exclusive request must
// wait even though it is compatible with the granted shared lock.
#[test]
fn test_fifo_blocks_compatible_latecomer() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::RepeatableRead);
    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    let t3 = tm.begin(IsolationLevel::RepeatableRead);

    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap());

    let x_waiter = {
        let lm = Arc::clone(&lm);
        let t2 = Arc::clone(&t2);
        thread::spawn(move || lm.lock_table(&t2, LockMode::Exclusive, TABLE_A).unwrap())
    };
    thread::sleep(Duration::from_millis(100));

    let s_waiter = {
        let lm = Arc::clone(&lm);
        let t3 = Arc::clone(&t3);
        thread::spawn(move || lm.lock_table(&t3, LockMode::Shared, TABLE_A).unwrap())
    };
    thread::sleep(Duration::from_millis(200));

    // t3 is compatible with t1, but t2 queued first
    assert!(!x_waiter.is_finished());
    assert!(!s_waiter.is_finished());

    lm.unlock_table(&t1, TABLE_A).unwrap();
    assert!(x_waiter.join().unwrap());

    lm.unlock_table(&t2, TABLE_A).unwrap();
    assert!(s_waiter.join().unwrap());
}

#[test]
fn test_shrinking_rules_by_isolation_level() {
    let (lm, tm) = setup();

    // READ_COMMITTED: unlocking X shrinks, and S/IS stay acquirable in the
    // shrinking phase while X/IX/SIX do not
    let t1 = tm.begin(IsolationLevel::ReadCommitted);
    assert!(lm.lock_table(&t1, LockMode::Exclusive, TABLE_A).unwrap());
    lm.unlock_table(&t1, TABLE_A).unwrap();
    assert_eq!(t1.state(), TransactionState::Shrinking);

    assert!(lm.lock_table(&t1, LockMode::IntentionShared, TABLE_B).unwrap());
    assert!(lm.lock_table(&t1, LockMode::Shared, TABLE_A).unwrap());

    let err = lm
        .lock_table(&t1, LockMode::IntentionExclusive, TABLE_B)
        .unwrap_err();
    assert_eq!(err.reason, AbortReason::LockOnShrinking);
}

#[test]
fn test_try_wrappers_swallow_abort_errors() {
    let (lm, tm) = setup();
    let t1 = tm.begin(IsolationLevel::ReadUncommitted);

    // Shared under READ_UNCOMMITTED aborts; the wrapper reports plain false
    assert!(!lm.try_lock_table(&t1, LockMode::Shared, TABLE_A));
    assert_eq!(t1.state(), TransactionState::Aborted);

    let t2 = tm.begin(IsolationLevel::RepeatableRead);
    assert!(lm.try_lock_table(&t2, LockMode::Shared, TABLE_A));
    assert!(lm.try_unlock_table(&t2, TABLE_A));
    assert!(!lm.try_unlock_table(&t2, TABLE_A));
}
