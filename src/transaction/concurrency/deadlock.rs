use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use log::debug;

use crate::common::types::TxnId;
use crate::transaction::concurrency::lock_manager::{LockManager, LockRequestQueue};
use crate::transaction::concurrency::transaction::{Transaction, TransactionState};

/// Start the background detector. It holds only a weak handle so dropping
/// the last `Arc<LockManager>` shuts the thread down.
pub(crate) fn spawn_detector(manager: Weak<LockManager>, interval: Duration) -> JoinHandle<()> {
    thread::spawn(move || loop {
        thread::sleep(interval);
        let Some(manager) = manager.upgrade() else {
            return;
        };
        if !manager.enable_cycle_detection.load(Ordering::SeqCst) {
            return;
        }
        manager.detect_and_break_cycles();
    })
}

impl LockManager {
    /// One detection tick: under a global view of both resource maps,
    /// rebuild the wait-for graph, abort the youngest transaction of each
    /// cycle and purge its requests, until no cycle remains.
    pub(crate) fn detect_and_break_cycles(&self) {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();
        let queues: Vec<Arc<LockRequestQueue>> =
            table_map.values().chain(row_map.values()).cloned().collect();

        loop {
            let (graph, txns) = Self::build_wait_for_graph(&queues);
            let Some(cycle) = find_cycle(&graph) else {
                break;
            };

            // Victim: the highest (youngest) transaction id in the cycle
            let victim_id = *cycle.iter().max().expect("cycle is non-empty");
            let victim = &txns[&victim_id];
            debug!("deadlock cycle {:?}; aborting transaction {}", cycle, victim_id);
            victim.set_state(TransactionState::Aborted);

            for queue in &queues {
                let mut q = queue.inner.lock();
                let involved = q.requests.iter().any(|r| r.txn.id() == victim_id);
                q.requests.retain(|r| r.txn.id() != victim_id);
                if q.upgrading == Some(victim_id) {
                    q.upgrading = None;
                }
                drop(q);
                if involved {
                    queue.cv.notify_all();
                }
            }
        }
    }

    /// Edges run from each waiter to every earlier granted holder it is
    /// incompatible with. Aborted transactions do not appear.
    fn build_wait_for_graph(
        queues: &[Arc<LockRequestQueue>],
    ) -> (BTreeMap<TxnId, BTreeSet<TxnId>>, HashMap<TxnId, Arc<Transaction>>) {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut txns: HashMap<TxnId, Arc<Transaction>> = HashMap::new();

        for queue in queues {
            let q = queue.inner.lock();
            for (pos, waiter) in q.requests.iter().enumerate() {
                if waiter.granted || waiter.txn.state() == TransactionState::Aborted {
                    continue;
                }
                for holder in q.requests.iter().take(pos) {
                    if !holder.granted || holder.txn.state() == TransactionState::Aborted {
                        continue;
                    }
                    if !holder.mode.compatible_with(waiter.mode) {
                        graph.entry(waiter.txn.id()).or_default().insert(holder.txn.id());
                        txns.insert(waiter.txn.id(), Arc::clone(&waiter.txn));
                        txns.insert(holder.txn.id(), Arc::clone(&holder.txn));
                    }
                }
            }
        }
        (graph, txns)
    }
}

/// Deterministic cycle search: start nodes and out-edges are visited in
/// ascending transaction-id order.
fn find_cycle(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<Vec<TxnId>> {
    let mut visited: HashSet<TxnId> = HashSet::new();
    for &start in graph.keys() {
        if visited.contains(&start) {
            continue;
        }
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        if let Some(cycle) = dfs(start, graph, &mut visited, &mut path, &mut on_path) {
            return Some(cycle);
        }
    }
    None
}

fn dfs(
    node: TxnId,
    graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
    visited: &mut HashSet<TxnId>,
    path: &mut Vec<TxnId>,
    on_path: &mut HashSet<TxnId>,
) -> Option<Vec<TxnId>> {
    visited.insert(node);
    path.push(node);
    on_path.insert(node);

    if let Some(edges) = graph.get(&node) {
        for &next in edges {
            if on_path.contains(&next) {
                let start = path.iter().position(|&n| n == next).expect("node is on the path");
                return Some(path[start..].to_vec());
            }
            if !visited.contains(&next) {
                if let Some(cycle) = dfs(next, graph, visited, path, on_path) {
                    return Some(cycle);
                }
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}
