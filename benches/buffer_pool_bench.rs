use criterion::{criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tempfile::NamedTempFile;

use kestreldb::storage::buffer::BufferPoolManager;

fn bench_fetch_resident_pages(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(64, file.path()).unwrap());

    let mut page_ids = Vec::new();
    for _ in 0..32 {
        let (page_id, _) = pool.new_page().unwrap().unwrap();
        pool.unpin_page(page_id, false);
        page_ids.push(page_id);
    }

    c.bench_function("fetch_unpin_resident", |b| {
        b.iter(|| {
            for &page_id in &page_ids {
                let _page = pool.fetch_page(page_id).unwrap().unwrap();
                pool.unpin_page(page_id, false);
            }
        })
    });
}

fn bench_eviction_churn(c: &mut Criterion) {
    let file = NamedTempFile::new().unwrap();
    let pool = Arc::new(BufferPoolManager::new(8, file.path()).unwrap());

    // Twice as many pages as frames: every pass evicts
    let mut page_ids = Vec::new();
    for _ in 0..16 {
        let (page_id, _) = pool.new_page().unwrap().unwrap();
        pool.unpin_page(page_id, true);
        page_ids.push(page_id);
    }

    c.bench_function("fetch_with_eviction", |b| {
        b.iter(|| {
            for &page_id in &page_ids {
                let _page = pool.fetch_page(page_id).unwrap().unwrap();
                pool.unpin_page(page_id, false);
            }
        })
    });
}

criterion_group!(benches, bench_fetch_resident_pages, bench_eviction_churn);
criterion_main!(benches);
