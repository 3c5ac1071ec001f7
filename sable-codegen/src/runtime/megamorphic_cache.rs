use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::il::Function;
use crate::object_model::{ClassId, Symbol, ILLEGAL_CID};
use crate::runtime::ArgumentsDescriptor;

// Layout read by emitted code. Buckets hold two words per entry: the class id
// as smi and the target function.
pub const MEGAMORPHIC_BUCKETS_OFFSET: i32 = 8;
pub const MEGAMORPHIC_MASK_OFFSET: i32 = 16;
pub const MEGAMORPHIC_ENTRY_CLASS_ID_OFFSET: i32 = 0;
pub const MEGAMORPHIC_ENTRY_TARGET_OFFSET: i32 = 8;

/// Multiplier applied to the class id before masking, emitted as two lea.
pub const SPREAD_FACTOR: usize = 7;

pub const MIN_CAPACITY: usize = 4;

#[derive(Clone)]
struct Bucket {
    class_id: ClassId,
    target: Arc<Function>,
}

struct Buckets {
    entries: Vec<Bucket>,
    filled: usize,
}

#[derive(Clone, Debug)]
pub enum ProbeResult {
    Hit(Arc<Function>),
    // empty slot reached, holds the miss handler
    Miss(Arc<Function>),
}

/// Open-addressed class id to target table shared by all call sites with
/// the same selector.
pub struct MegamorphicCache {
    pub target_name: Symbol,
    pub arguments_descriptor: Arc<ArgumentsDescriptor>,
    miss_handler: Arc<Function>,
    buckets: Mutex<Buckets>,
}

impl MegamorphicCache {
    pub fn new(
        target_name: Symbol,
        arguments_descriptor: Arc<ArgumentsDescriptor>,
        miss_handler: Arc<Function>,
        capacity: usize,
    ) -> MegamorphicCache {
        let capacity = capacity.max(MIN_CAPACITY).next_power_of_two();

        MegamorphicCache {
            target_name,
            arguments_descriptor,
            buckets: Mutex::new(Buckets {
                entries: empty_entries(&miss_handler, capacity),
                filled: 0,
            }),
            miss_handler,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.lock().entries.len()
    }

    pub fn mask(&self) -> usize {
        self.capacity() - 1
    }

    pub fn filled(&self) -> usize {
        self.buckets.lock().filled
    }

    pub fn insert(&self, class_id: ClassId, target: Arc<Function>) {
        assert!(class_id != ILLEGAL_CID);
        let mut buckets = self.buckets.lock();

        if (buckets.filled + 1) * 4 > buckets.entries.len() * 3 {
            let capacity = buckets.entries.len() * 2;
            trace!(
                name = %self.target_name,
                capacity,
                "growing megamorphic cache"
            );

            let old = std::mem::replace(
                &mut buckets.entries,
                empty_entries(&self.miss_handler, capacity),
            );
            buckets.filled = 0;

            for bucket in old.into_iter().filter(|b| b.class_id != ILLEGAL_CID) {
                insert_unchecked(&mut buckets, bucket);
            }
        }

        insert_unchecked(&mut buckets, Bucket { class_id, target });
    }

    /// Mirrors the probe loop emitted for megamorphic calls. The table always
    /// keeps an empty slot, the loop ends within `capacity` steps.
    pub fn probe(&self, class_id: ClassId) -> (ProbeResult, usize) {
        let buckets = self.buckets.lock();
        let mask = buckets.entries.len() - 1;
        let mut idx = initial_index(class_id, mask);

        for step in 1..=buckets.entries.len() {
            let bucket = &buckets.entries[idx];

            if bucket.class_id == class_id {
                return (ProbeResult::Hit(bucket.target.clone()), step);
            }

            if bucket.class_id == ILLEGAL_CID {
                return (ProbeResult::Miss(bucket.target.clone()), step);
            }

            idx = (idx + 1) & mask;
        }

        unreachable!("megamorphic cache without empty slot")
    }

    pub fn lookup(&self, class_id: ClassId) -> Option<Arc<Function>> {
        match self.probe(class_id).0 {
            ProbeResult::Hit(target) => Some(target),
            ProbeResult::Miss(_) => None,
        }
    }
}

impl fmt::Debug for MegamorphicCache {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MegamorphicCache")
            .field("target_name", &self.target_name)
            .field("capacity", &self.capacity())
            .field("filled", &self.filled())
            .finish()
    }
}

fn empty_entries(miss_handler: &Arc<Function>, capacity: usize) -> Vec<Bucket> {
    vec![
        Bucket {
            class_id: ILLEGAL_CID,
            target: miss_handler.clone(),
        };
        capacity
    ]
}

fn initial_index(class_id: ClassId, mask: usize) -> usize {
    (class_id.to_usize() * SPREAD_FACTOR) & mask
}

fn insert_unchecked(buckets: &mut Buckets, bucket: Bucket) {
    let mask = buckets.entries.len() - 1;
    let mut idx = initial_index(bucket.class_id, mask);

    loop {
        let current = buckets.entries[idx].class_id;

        if current == bucket.class_id {
            buckets.entries[idx] = bucket;
            return;
        }

        if current == ILLEGAL_CID {
            buckets.entries[idx] = bucket;
            buckets.filled += 1;
            return;
        }

        idx = (idx + 1) & mask;
    }
}

/// Process-wide caches, one per (selector, arguments descriptor).
pub struct MegamorphicCacheTable {
    miss_handler: Arc<Function>,
    initial_capacity: usize,
    inner: Mutex<HashMap<(Symbol, usize), Vec<Arc<MegamorphicCache>>>>,
}

impl MegamorphicCacheTable {
    pub fn new(miss_handler: Arc<Function>, initial_capacity: usize) -> MegamorphicCacheTable {
        MegamorphicCacheTable {
            miss_handler,
            initial_capacity,
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(
        &self,
        name: &Symbol,
        arguments_descriptor: &Arc<ArgumentsDescriptor>,
    ) -> Arc<MegamorphicCache> {
        let mut inner = self.inner.lock();
        let candidates = inner
            .entry((name.clone(), arguments_descriptor.count()))
            .or_default();

        if let Some(cache) = candidates
            .iter()
            .find(|cache| *cache.arguments_descriptor == **arguments_descriptor)
        {
            return cache.clone();
        }

        let cache = Arc::new(MegamorphicCache::new(
            name.clone(),
            arguments_descriptor.clone(),
            self.miss_handler.clone(),
            self.initial_capacity,
        ));
        candidates.push(cache.clone());
        cache
    }

    pub fn len(&self) -> usize {
        self.inner.lock().values().map(|caches| caches.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
