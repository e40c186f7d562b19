use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use tempfile::NamedTempFile;

use kestreldb::common::types::Rid;
use kestreldb::index::btree::BPlusTree;
use kestreldb::storage::buffer::BufferPoolManager;

fn new_tree() -> (BPlusTree<i32>, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(256, file.path()).unwrap());
    let tree = BPlusTree::<i32>::new("bench_pk", pool).unwrap();
    (tree, file)
}

fn bench_sequential_insert(c: &mut Criterion) {
    c.bench_function("btree_insert_1k", |b| {
        b.iter_batched(
            new_tree,
            |(tree, _file)| {
                for key in 0..1000 {
                    tree.insert(key, Rid::new(key, key as u32)).unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_point_lookup(c: &mut Criterion) {
    let (tree, _file) = new_tree();
    for key in 0..10_000 {
        tree.insert(key, Rid::new(key, key as u32)).unwrap();
    }

    c.bench_function("btree_find_10k", |b| {
        b.iter(|| {
            for key in (0..10_000).step_by(17) {
                assert!(tree.find(&key).unwrap().is_some());
            }
        })
    });
}

criterion_group!(benches, bench_sequential_insert, bench_point_lookup);
criterion_main!(benches);
