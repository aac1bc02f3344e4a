use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use parking_lot::Mutex;

/// Extendible hash table keyed by the last `global_depth` bits of the key
/// hash. The directory holds indices into a bucket slab; splitting a full
/// bucket re-points every directory slot that selects the new bucket by its
/// new local-depth bit, doubling the directory when the overflowing bucket is
/// already at global depth. Used as the buffer pool's page table.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    global_depth: u32,
    bucket_size: usize,
    /// directory[i] is an index into `buckets`
    directory: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

struct Bucket<K, V> {
    local_depth: u32,
    slots: Vec<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32) -> Self {
        Self {
            local_depth,
            slots: Vec::new(),
        }
    }
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a table whose buckets hold up to `bucket_size` entries
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0);
        Self {
            inner: Mutex::new(Inner {
                global_depth: 0,
                bucket_size,
                directory: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.bucket_for(key)];
        bucket
            .slots
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket_index = inner.bucket_for(key);
        let slots = &mut inner.buckets[bucket_index].slots;
        match slots.iter().position(|(k, _)| k == key) {
            Some(pos) => {
                slots.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Insert or overwrite the value for `key`, splitting buckets and
    /// doubling the directory as needed
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();

        let bucket_index = inner.bucket_for(&key);
        if let Some(slot) = inner.buckets[bucket_index]
            .slots
            .iter_mut()
            .find(|(k, _)| *k == key)
        {
            slot.1 = value;
            return;
        }

        // the bucket may still be full after one split, so loop
        while inner.buckets[inner.bucket_for(&key)].slots.len() >= inner.bucket_size {
            let overflow_index = inner.bucket_for(&key);
            let local_depth = inner.buckets[overflow_index].local_depth;
            debug_assert!(local_depth <= inner.global_depth);

            if local_depth == inner.global_depth {
                inner.global_depth += 1;
                let size = inner.directory.len();
                for i in 0..size {
                    let target = inner.directory[i];
                    inner.directory.push(target);
                }
            }

            // split: entries whose new-depth bit is set move to a new bucket
            let new_depth = local_depth + 1;
            let mask = 1usize << local_depth;
            let old_slots = std::mem::take(&mut inner.buckets[overflow_index].slots);
            let mut kept = Vec::new();
            let mut moved = Vec::new();
            for entry in old_slots {
                if Self::hash_of(&entry.0) & mask != 0 {
                    moved.push(entry);
                } else {
                    kept.push(entry);
                }
            }
            inner.buckets[overflow_index].local_depth = new_depth;
            inner.buckets[overflow_index].slots = kept;

            let new_index = inner.buckets.len();
            let mut new_bucket = Bucket::new(new_depth);
            new_bucket.slots = moved;
            inner.buckets.push(new_bucket);

            // re-point every directory slot selecting the new bucket
            let start = Self::hash_of(&key) & (mask - 1);
            let mut i = start;
            while i < inner.directory.len() {
                if inner.directory[i] == overflow_index && i & mask != 0 {
                    inner.directory[i] = new_index;
                }
                i += mask;
            }
        }

        let bucket_index = inner.bucket_for(&key);
        inner.buckets[bucket_index].slots.push((key, value));
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, directory_index: usize) -> u32 {
        let inner = self.inner.lock();
        inner.buckets[inner.directory[directory_index]].local_depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.buckets.iter().map(|b| b.slots.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn hash_of(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }
}

impl<K: Hash, V> Inner<K, V> {
    fn bucket_for(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish() as usize;
        self.directory[hash & ((1 << self.global_depth) - 1)]
    }
}
