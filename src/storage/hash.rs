//! Progressive-rehashing hash index.
//!
//! The index never stores keys. Each member embeds a [`HashLink`] holding
//! its hash code and the next member in its bucket chain; equality is a
//! predicate supplied at every lookup. The same type therefore backs both
//! the top-level key space and every sorted set's member index.
//!
//! ## Resizing
//!
//! ```text
//!   newer: [ . | a | . | b | . | . | c | . ]   <- inserts land here
//!   older: [ d | e→f | . | g ]                 <- drained 128 buckets per call
//!            ^ migrate_pos
//! ```
//!
//! When the load factor is exceeded the current table becomes `older` and
//! a table of twice the capacity becomes `newer`. Every subsequent
//! `insert`, `find` and `remove` first migrates a bounded number of buckets,
//! so no single call pays for the whole rehash. Lookups probe both tables
//! until `older` is empty.

use slab::Slab;
use tracing::debug;

/// Capacity of the first table allocated on insert.
const INITIAL_CAPACITY: usize = 4;

/// A resize starts once `size / capacity` reaches this value.
pub const MAX_LOAD_FACTOR: usize = 8;

/// Buckets migrated from the older table per operation.
pub const REHASH_STEP: usize = 128;

/// Hashes a byte string. Used for top-level keys and sorted-set members.
pub fn str_hash(data: &[u8]) -> u64 {
    let mut h: u32 = 0x811C_9DC5;
    for &b in data {
        h = h.wrapping_add(b as u32).wrapping_mul(0x0100_0193);
    }
    h as u64
}

/// Bucket-chain link embedded in every indexed item.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashLink {
    next: Option<usize>,
    hcode: u64,
}

impl HashLink {
    pub fn new(hcode: u64) -> Self {
        Self { next: None, hcode }
    }

    #[inline]
    pub fn hcode(&self) -> u64 {
        self.hcode
    }
}

/// Types that can be stored in a [`HashIndex`].
pub trait Hashed {
    fn hash_link(&self) -> &HashLink;
    fn hash_link_mut(&mut self) -> &mut HashLink;
}

/// One fixed-size generation of buckets.
#[derive(Debug, Default)]
struct Table {
    slots: Vec<Option<usize>>,
    mask: usize,
    size: usize,
}

impl Table {
    fn with_capacity(n: usize) -> Self {
        debug_assert!(n.is_power_of_two());
        Self {
            slots: vec![None; n],
            mask: n - 1,
            size: 0,
        }
    }

    #[inline]
    fn is_allocated(&self) -> bool {
        !self.slots.is_empty()
    }

    #[inline]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn bucket(&self, hcode: u64) -> usize {
        (hcode as usize) & self.mask
    }

    fn push<T: Hashed>(&mut self, nodes: &mut Slab<T>, id: usize) {
        let pos = self.bucket(nodes[id].hash_link().hcode);
        nodes[id].hash_link_mut().next = self.slots[pos];
        self.slots[pos] = Some(id);
        self.size += 1;
    }

    /// Finds a matching member, returning it with its chain predecessor.
    fn locate<T, F>(&self, nodes: &Slab<T>, hcode: u64, eq: &mut F) -> Option<(Option<usize>, usize)>
    where
        T: Hashed,
        F: FnMut(&T) -> bool,
    {
        if !self.is_allocated() {
            return None;
        }

        let mut prev = None;
        let mut cur = self.slots[self.bucket(hcode)];
        while let Some(id) = cur {
            let node = &nodes[id];
            if node.hash_link().hcode == hcode && eq(node) {
                return Some((prev, id));
            }
            prev = Some(id);
            cur = node.hash_link().next;
        }
        None
    }

    fn unlink<T: Hashed>(&mut self, nodes: &mut Slab<T>, prev: Option<usize>, id: usize) {
        let link = *nodes[id].hash_link();
        match prev {
            Some(p) => nodes[p].hash_link_mut().next = link.next,
            None => {
                let pos = self.bucket(link.hcode);
                self.slots[pos] = link.next;
            }
        }
        nodes[id].hash_link_mut().next = None;
        self.size -= 1;
    }

    fn for_each(&self, mut visit: impl FnMut(usize), next: impl Fn(usize) -> Option<usize>) {
        if self.size == 0 {
            return;
        }
        for head in &self.slots {
            let mut cur = *head;
            while let Some(id) = cur {
                cur = next(id);
                visit(id);
            }
        }
    }
}

/// A chained hash index over slab keys, resized incrementally.
#[derive(Debug, Default)]
pub struct HashIndex {
    newer: Table,
    older: Table,
    migrate_pos: usize,
}

impl HashIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indexed members across both generations.
    #[inline]
    pub fn len(&self) -> usize {
        self.newer.size + self.older.size
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while members still remain in the older generation.
    #[inline]
    pub fn is_resizing(&self) -> bool {
        self.older.is_allocated()
    }

    /// Capacity of the generation receiving inserts.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.newer.capacity()
    }

    /// Indexes `id`. The item's `HashLink` must already carry its hash code.
    pub fn insert<T: Hashed>(&mut self, nodes: &mut Slab<T>, id: usize) {
        if !self.newer.is_allocated() {
            self.newer = Table::with_capacity(INITIAL_CAPACITY);
        }
        self.newer.push(nodes, id);

        if !self.older.is_allocated() {
            // integer division: stays 0 until size reaches a full multiple of capacity
            let load_factor = self.newer.size / self.newer.capacity();
            if load_factor >= MAX_LOAD_FACTOR {
                self.start_resizing();
            }
        }
        self.help_resizing(nodes);
    }

    /// Looks up a member with hash `hcode` satisfying `eq`.
    pub fn find<T, F>(&mut self, nodes: &mut Slab<T>, hcode: u64, mut eq: F) -> Option<usize>
    where
        T: Hashed,
        F: FnMut(&T) -> bool,
    {
        self.help_resizing(nodes);
        self.newer
            .locate(nodes, hcode, &mut eq)
            .or_else(|| self.older.locate(nodes, hcode, &mut eq))
            .map(|(_, id)| id)
    }

    /// Unlinks and returns a matching member. The slab slot itself is left
    /// for the caller to reclaim.
    pub fn remove<T, F>(&mut self, nodes: &mut Slab<T>, hcode: u64, mut eq: F) -> Option<usize>
    where
        T: Hashed,
        F: FnMut(&T) -> bool,
    {
        self.help_resizing(nodes);

        if let Some((prev, id)) = self.newer.locate(nodes, hcode, &mut eq) {
            self.newer.unlink(nodes, prev, id);
            return Some(id);
        }
        if let Some((prev, id)) = self.older.locate(nodes, hcode, &mut eq) {
            self.older.unlink(nodes, prev, id);
            return Some(id);
        }
        None
    }

    /// Visits every member in both generations. Order is unspecified.
    pub fn scan<T: Hashed>(&self, nodes: &Slab<T>, mut visit: impl FnMut(usize, &T)) {
        let next = |id: usize| nodes[id].hash_link().next;
        self.newer.for_each(|id| visit(id, &nodes[id]), next);
        self.older.for_each(|id| visit(id, &nodes[id]), next);
    }

    fn start_resizing(&mut self) {
        debug_assert!(!self.older.is_allocated());
        let capacity = self.newer.capacity() * 2;
        self.older = std::mem::replace(&mut self.newer, Table::with_capacity(capacity));
        self.migrate_pos = 0;
        debug!(size = self.older.size, capacity, "hash index resize started");
    }

    fn help_resizing<T: Hashed>(&mut self, nodes: &mut Slab<T>) {
        let mut work = 0;
        while work < REHASH_STEP && self.older.size > 0 {
            let pos = self.migrate_pos;
            while let Some(id) = self.older.slots[pos] {
                self.older.slots[pos] = nodes[id].hash_link().next;
                self.older.size -= 1;
                self.newer.push(nodes, id);
            }
            self.migrate_pos += 1;
            work += 1;
        }

        if self.older.size == 0 && self.older.is_allocated() {
            self.older = Table::default();
        }
    }
}
