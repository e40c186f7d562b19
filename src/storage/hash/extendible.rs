use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use parking_lot::Mutex;

/// Extendible hash table with a doubling directory and bounded buckets.
///
/// Used as the buffer pool's page table (PageId -> FrameId) and available to
/// executors as a general concurrent map. A single table-wide mutex guards
/// the structure; the table is not on the hot path of page I/O.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<TableInner<K, V>>,
    bucket_size: usize,
}

struct TableInner<K, V> {
    /// Directory of bucket indices into `buckets`; length is 2^global_depth.
    /// Several directory slots may reference the same bucket.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
    global_depth: u32,
}

struct Bucket<K, V> {
    items: Vec<(K, V)>,
    local_depth: u32,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            items: Vec::new(),
            local_depth,
        }
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            inner: Mutex::new(TableInner {
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
                global_depth: 0,
            }),
            bucket_size,
        }
    }

    /// Look up the value stored under `key`
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.dir[inner.index_of(key)]];
        bucket.items.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
    }

    /// Insert `key -> value`, overwriting any previous value for the key.
    /// A full bucket is split, doubling the directory when the bucket's
    /// local depth has caught up with the global depth.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let idx = inner.index_of(&key);
        let bucket_no = inner.dir[idx];
        let bucket = &mut inner.buckets[bucket_no];

        if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
            return;
        }
        if bucket.items.len() < self.bucket_size {
            bucket.items.push((key, value));
            return;
        }

        // Bucket is full and the key is new: append past the bound (the
        // overflow is invisible outside this critical section) and split
        // until every bucket is within bounds again.
        bucket.items.push((key, value));
        self.split_bucket(&mut inner, idx);
    }

    /// Remove the entry for `key`, returning whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let idx = inner.index_of(key);
        let bucket_no = inner.dir[idx];
        let bucket = &mut inner.buckets[bucket_no];
        let before = bucket.items.len();
        bucket.items.retain(|(k, _)| k != key);
        bucket.items.len() < before
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// Split the bucket serving directory slot `idx`, redistributing its
    /// entries by the newly significant hash bit and rewiring every
    /// directory slot whose low bits match. Recurses if the pathological
    /// case (all entries hash to the same side) leaves a bucket overflowed.
    fn split_bucket(&self, inner: &mut TableInner<K, V>, idx: usize) {
        let old_no = inner.dir[idx];
        if inner.buckets[old_no].local_depth == inner.global_depth {
            // Double the directory: the new half mirrors the old half
            let old_len = inner.dir.len();
            inner.dir.extend_from_within(0..old_len);
            inner.global_depth += 1;
        }

        inner.buckets[old_no].local_depth += 1;
        let new_depth = inner.buckets[old_no].local_depth;
        let new_no = inner.buckets.len();
        inner.buckets.push(Bucket::new(new_depth));

        // The bit that now distinguishes the siblings
        let split_bit = 1usize << (new_depth - 1);

        let items = std::mem::take(&mut inner.buckets[old_no].items);
        let (stay, moved): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|(k, _)| hash_of(k) as usize & split_bit == idx & split_bit);
        inner.buckets[old_no].items = stay;
        inner.buckets[new_no].items = moved;

        // Rewire directory slots previously sharing the old bucket
        let mask = split_bit - 1;
        let mut new_idx = idx;
        for slot in 0..inner.dir.len() {
            if inner.dir[slot] != old_no || slot & mask != idx & mask {
                continue;
            }
            if slot & split_bit != idx & split_bit {
                inner.dir[slot] = new_no;
                new_idx = slot;
            }
        }

        if inner.buckets[old_no].items.len() > self.bucket_size {
            self.split_bucket(inner, idx);
        } else if inner.buckets[new_no].items.len() > self.bucket_size {
            self.split_bucket(inner, new_idx);
        }
    }
}

impl<K: Hash, V> TableInner<K, V> {
    fn index_of(&self, key: &K) -> usize {
        let mask = (1usize << self.global_depth) - 1;
        hash_of(key) as usize & mask
    }
}

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}
