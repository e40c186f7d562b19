use anyhow::Result;
use std::sync::Arc;

mod common;
use common::create_test_buffer_pool;

use kestreldb::common::types::Rid;
use kestreldb::executor::{DeleteExecutor, InsertExecutor, SeqScanExecutor};
use kestreldb::index::btree::BPlusTree;
use kestreldb::transaction::concurrency::{IsolationLevel, LockManager, TransactionManager};

const ORDERS: u32 = 1;

fn rows(keys: &[i32]) -> Vec<(i32, Rid)> {
    keys.iter().map(|&k| (k, Rid::new(k, k as u32))).collect()
}

#[test]
fn test_insert_scan_delete_cycle() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index = BPlusTree::<i32>::with_max_sizes("orders_pk", buffer_pool, 4, 5)?;
    let lm = LockManager::new_default();
    let tm = TransactionManager::new(Arc::clone(&lm));

    // Insert under one transaction and commit
    let writer = tm.begin(IsolationLevel::RepeatableRead);
    let inserted = InsertExecutor::new(&writer, &lm, &index, ORDERS).execute(&rows(&[3, 1, 4, 1, 5]))?;
    assert_eq!(inserted, 4); // the duplicate 1 is skipped
    assert!(tm.commit(&writer));

    // Scan under a second transaction: row S locks on every row
    let reader = tm.begin(IsolationLevel::RepeatableRead);
    let scanned = SeqScanExecutor::new(&reader, &lm, &index, ORDERS).execute()?;
    assert_eq!(scanned.iter().map(|&(k, _)| k).collect::<Vec<_>>(), vec![1, 3, 4, 5]);
    assert_eq!(reader.lock_count(), 1 + 4); // IS + four row S locks
    assert!(tm.commit(&reader));

    // Delete two keys and verify with a final scan
    let deleter = tm.begin(IsolationLevel::RepeatableRead);
    let removed = DeleteExecutor::new(&deleter, &lm, &index, ORDERS).execute(&[1, 4, 99])?;
    assert_eq!(removed, 2);
    assert!(tm.commit(&deleter));

    let reader = tm.begin(IsolationLevel::RepeatableRead);
    let scanned = SeqScanExecutor::new(&reader, &lm, &index, ORDERS).execute()?;
    assert_eq!(scanned.iter().map(|&(k, _)| k).collect::<Vec<_>>(), vec![3, 5]);
    assert!(tm.commit(&reader));
    Ok(())
}

#[test]
fn test_read_uncommitted_scan_takes_no_locks() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index = BPlusTree::<i32>::with_max_sizes("orders_pk", buffer_pool, 4, 5)?;
    let lm = LockManager::new_default();
    let tm = TransactionManager::new(Arc::clone(&lm));

    let writer = tm.begin(IsolationLevel::RepeatableRead);
    InsertExecutor::new(&writer, &lm, &index, ORDERS).execute(&rows(&[10, 20]))?;

    // The writer still holds its X row locks, but a dirty reader breezes
    // past them
    let dirty_reader = tm.begin(IsolationLevel::ReadUncommitted);
    let scanned = SeqScanExecutor::new(&dirty_reader, &lm, &index, ORDERS).execute()?;
    assert_eq!(scanned.len(), 2);
    assert_eq!(dirty_reader.lock_count(), 0);

    assert!(tm.commit(&writer));
    assert!(tm.commit(&dirty_reader));
    Ok(())
}

#[test]
fn test_read_committed_scan_releases_row_locks() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let index = BPlusTree::<i32>::with_max_sizes("orders_pk", buffer_pool, 4, 5)?;
    let lm = LockManager::new_default();
    let tm = TransactionManager::new(Arc::clone(&lm));

    let writer = tm.begin(IsolationLevel::RepeatableRead);
    InsertExecutor::new(&writer, &lm, &index, ORDERS).execute(&rows(&[7, 8, 9]))?;
    assert!(tm.commit(&writer));

    let reader = tm.begin(IsolationLevel::ReadCommitted);
    let scanned = SeqScanExecutor::new(&reader, &lm, &index, ORDERS).execute()?;
    assert_eq!(scanned.len(), 3);
    // Row S locks were dropped as soon as each row was produced; only the
    // table IS lock remains
    assert_eq!(reader.lock_count(), 1);
    assert!(tm.commit(&reader));
    Ok(())
}
