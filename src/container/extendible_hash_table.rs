use std::sync::RwLock;

use log::debug;

use crate::utils::HandyRwLock;

/// Key contract for the hash table: an explicit directory hash. Integer
/// keys hash to themselves, which keeps bucket placement transparent.
pub trait BucketKey: Clone + Eq {
    fn bucket_hash(&self) -> u64;
}

macro_rules! identity_bucket_key {
    ($($t:ty),*) => {
        $(impl BucketKey for $t {
            fn bucket_hash(&self) -> u64 {
                *self as u64
            }
        })*
    };
}

identity_bucket_key!(u32, u64, usize, i32, i64);

struct Bucket<K, V> {
    items: Vec<(K, V)>,
    depth: usize,
}

impl<K: BucketKey, V: Clone> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            items: Vec::new(),
            depth,
        }
    }

    fn find(&self, key: &K) -> Option<V> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.items.iter().position(|(k, _)| k == key) {
            Some(i) => {
                self.items.remove(i);
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite. Returns false when the bucket is full and the
    /// key is not already present.
    fn insert(&mut self, key: &K, value: &V, capacity: usize) -> bool {
        for (k, v) in self.items.iter_mut() {
            if k == key {
                *v = value.clone();
                return true;
            }
        }

        if self.items.len() < capacity {
            self.items.push((key.clone(), value.clone()));
            return true;
        }

        false
    }
}

struct TableInner<K, V> {
    global_depth: usize,
    // Directory slots hold indices into the bucket slab; several slots may
    // alias the same bucket.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// In-memory extendible hash table: a doubling directory over split-on-
/// overflow buckets. One reader/writer latch guards the directory and all
/// buckets.
pub struct ExtendibleHashTable<K, V> {
    bucket_size: usize,
    inner: RwLock<TableInner<K, V>>,
}

impl<K: BucketKey, V: Clone> ExtendibleHashTable<K, V> {
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size >= 1);
        Self {
            bucket_size,
            inner: RwLock::new(TableInner {
                global_depth: 0,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    fn index_of(inner: &TableInner<K, V>, key: &K) -> usize {
        (key.bucket_hash() & ((1u64 << inner.global_depth) - 1)) as usize
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.rl();
        let index = Self::index_of(&inner, key);
        inner.buckets[inner.dir[index]].find(key)
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.wl();
        let index = Self::index_of(&inner, key);
        let bucket = inner.dir[index];
        inner.buckets[bucket].remove(key)
    }

    /// Insert `key -> value`, overwriting an existing mapping. Splits the
    /// target bucket (doubling the directory when its local depth has
    /// caught up with the global depth) until the entry fits.
    pub fn insert(&self, key: &K, value: &V) {
        let mut inner = self.inner.wl();

        let mut index = Self::index_of(&inner, key);
        let mut bucket = inner.dir[index];
        if inner.buckets[bucket].insert(key, value, self.bucket_size) {
            return;
        }

        while inner.buckets[bucket].items.len() >= self.bucket_size {
            let local_depth = inner.buckets[bucket].depth;
            let local_mask = 1usize << local_depth;

            if local_depth == inner.global_depth {
                let n = inner.dir.len();
                inner.global_depth += 1;
                inner.dir.extend_from_within(0..n);
                debug!("directory doubled, global depth {}", inner.global_depth);
            }

            // Split: the overflowing bucket keeps the entries whose new
            // discriminating bit is 1, the fresh peer takes the 0 side.
            inner.buckets[bucket].depth += 1;
            let new_bucket = inner.buckets.len();
            let mut peer = Bucket::new(local_depth + 1);

            let mut kept = Vec::new();
            for (k, v) in inner.buckets[bucket].items.drain(..) {
                if (k.bucket_hash() >> local_depth) & 1 == 0 {
                    peer.items.push((k, v));
                } else {
                    kept.push((k, v));
                }
            }
            inner.buckets[bucket].items = kept;
            inner.buckets.push(peer);

            let start = (key.bucket_hash() as usize) & (local_mask - 1);
            let dir_len = inner.dir.len();
            let mut i = start;
            while i < dir_len {
                if (i >> local_depth) & 1 == 0 {
                    inner.dir[i] = new_bucket;
                }
                i += local_mask;
            }

            index = Self::index_of(&inner, key);
            bucket = inner.dir[index];
        }

        inner.buckets[bucket].insert(key, value, self.bucket_size);
    }

    pub fn global_depth(&self) -> usize {
        self.inner.rl().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.rl();
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.rl().buckets.len()
    }
}
