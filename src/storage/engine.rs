//! Key-Value Store
//!
//! The store owns every entry in the keyspace. Entries live in one slab and
//! are threaded onto two intrusive structures at once:
//!
//! ```text
//!   ┌──────────────────── Slab<Entry> ─────────────────────┐
//!   │  Entry { key, value: Str | ZSet, hlink, heap_slot }  │
//!   └──────────────────────────────────────────────────────┘
//!          ▲ hlink                         ▲ heap_slot
//!     HashIndex (by key)            ExpirationHeap (by deadline)
//! ```
//!
//! An entry is created by the first write to its key, mutated in place by
//! later writes of the same type, and destroyed by `del`, by a `set` that
//! replaces a sorted set, or by the expiry sweep. Destroying an entry always
//! clears its heap slot first, so the heap never names a freed slab key.
//!
//! Only the reactor thread touches the store, so none of this is locked.
//! The one exception is disposal of very large sorted sets, which is handed
//! off to a [`WorkerPool`] once the set is already unreachable.

use bytes::Bytes;
use slab::Slab;
use thiserror::Error;
use tracing::{debug, trace};

use super::dropper::WorkerPool;
use super::expiry::{ExpirationHeap, HeapSlot};
use super::hash::{str_hash, HashIndex, HashLink, Hashed};
use super::zset::{AddOutcome, SortedSet};
use crate::config::ServerConfig;

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The key holds a value of another type.
    #[error("expect {expected}")]
    WrongType { expected: &'static str },
}

/// The value stored under a key.
#[derive(Debug)]
pub enum EntryValue {
    Str(Bytes),
    ZSet(SortedSet),
}

/// One key in the keyspace.
#[derive(Debug)]
pub struct Entry {
    key: Bytes,
    value: EntryValue,
    hlink: HashLink,
    heap_slot: Option<usize>,
}

impl Entry {
    fn new(key: Bytes, value: EntryValue) -> Self {
        let hlink = HashLink::new(str_hash(&key));
        Self {
            key,
            value,
            hlink,
            heap_slot: None,
        }
    }

    pub fn key(&self) -> &Bytes {
        &self.key
    }

    pub fn value(&self) -> &EntryValue {
        &self.value
    }
}

impl Hashed for Entry {
    fn hash_link(&self) -> &HashLink {
        &self.hlink
    }
    fn hash_link_mut(&mut self) -> &mut HashLink {
        &mut self.hlink
    }
}

impl HeapSlot for Entry {
    fn heap_slot(&self) -> Option<usize> {
        self.heap_slot
    }
    fn set_heap_slot(&mut self, slot: Option<usize>) {
        self.heap_slot = slot;
    }
}

/// The keyspace: entries, the key index and the TTL heap.
#[derive(Debug)]
pub struct Store {
    entries: Slab<Entry>,
    index: HashIndex,
    heap: ExpirationHeap,
    pool: Option<WorkerPool>,
    large_zset_threshold: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store that disposes every value inline.
    pub fn new() -> Self {
        Self {
            entries: Slab::new(),
            index: HashIndex::new(),
            heap: ExpirationHeap::new(),
            pool: None,
            large_zset_threshold: usize::MAX,
        }
    }

    /// Creates a store with a dispose pool sized from `config`.
    pub fn with_config(config: &ServerConfig) -> Self {
        let pool = (config.dispose_threads > 0).then(|| WorkerPool::new(config.dispose_threads));
        Self {
            pool,
            large_zset_threshold: config.large_zset_threshold,
            ..Self::new()
        }
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&mut self, key: &[u8]) -> Option<usize> {
        self.index
            .find(&mut self.entries, str_hash(key), |e| e.key.as_ref() == key)
    }

    fn insert_entry(&mut self, key: Bytes, value: EntryValue) -> usize {
        let id = self.entries.insert(Entry::new(key, value));
        self.index.insert(&mut self.entries, id);
        id
    }

    /// Unlinks `id` from the index and the heap, then frees it.
    fn remove_entry(&mut self, id: usize) {
        self.heap.set_deadline(&mut self.entries, id, None);
        let key = self.entries[id].key.clone();
        let hcode = self.entries[id].hlink.hcode();
        let removed = self.index.remove(&mut self.entries, hcode, |e| e.key == key);
        debug_assert_eq!(removed, Some(id));
        let entry = self.entries.remove(id);
        self.dispose(entry.value);
    }

    fn dispose(&self, value: EntryValue) {
        let EntryValue::ZSet(set) = value else {
            return;
        };
        match &self.pool {
            Some(pool) if set.len() > self.large_zset_threshold => {
                trace!(members = set.len(), "deferring sorted set disposal");
                pool.submit(Box::new(move || {
                    set.dispose();
                }));
            }
            _ => {
                set.dispose();
            }
        }
    }

    /// Returns the string stored at `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<&Bytes>, StoreError> {
        let Some(id) = self.find(key) else {
            return Ok(None);
        };
        match &self.entries[id].value {
            EntryValue::Str(value) => Ok(Some(value)),
            EntryValue::ZSet(_) => Err(StoreError::WrongType { expected: "string" }),
        }
    }

    /// Stores a string. Overwriting a string keeps its TTL; a sorted set
    /// under the same key is destroyed and replaced.
    pub fn set(&mut self, key: Bytes, value: Bytes) {
        if let Some(id) = self.find(&key) {
            if let EntryValue::Str(existing) = &mut self.entries[id].value {
                *existing = value;
                return;
            }
            self.remove_entry(id);
        }
        self.insert_entry(key, EntryValue::Str(value));
    }

    /// Removes `key`. Returns false if it did not exist.
    pub fn delete(&mut self, key: &[u8]) -> bool {
        match self.find(key) {
            Some(id) => {
                self.remove_entry(id);
                true
            }
            None => false,
        }
    }

    /// Visits every key. Order is unspecified.
    pub fn scan_keys(&self, mut visit: impl FnMut(&Bytes)) {
        self.index.scan(&self.entries, |_, entry| visit(&entry.key));
    }

    /// Sets a TTL of `ttl_ms` from `now_us`, or removes the TTL when
    /// `ttl_ms` is negative. Returns false if the key does not exist.
    pub fn expire(&mut self, key: &[u8], ttl_ms: i64, now_us: u64) -> bool {
        let Some(id) = self.find(key) else {
            return false;
        };
        let deadline = u64::try_from(ttl_ms)
            .ok()
            .map(|ms| now_us.saturating_add(ms.saturating_mul(1000)));
        self.heap.set_deadline(&mut self.entries, id, deadline);
        true
    }

    /// Remaining TTL in milliseconds, -1 if the key has none. `None` if the
    /// key does not exist.
    pub fn ttl_ms(&mut self, key: &[u8], now_us: u64) -> Option<i64> {
        let id = self.find(key)?;
        let Some(slot) = self.entries[id].heap_slot else {
            return Some(-1);
        };
        let deadline = self.heap.deadline_at(slot);
        Some((deadline.saturating_sub(now_us) / 1000) as i64)
    }

    /// Adds `member` to the sorted set at `key`, creating the set if needed.
    pub fn zadd(
        &mut self,
        key: Bytes,
        score: f64,
        member: Bytes,
    ) -> Result<AddOutcome, StoreError> {
        let id = match self.find(&key) {
            Some(id) => id,
            None => self.insert_entry(key, EntryValue::ZSet(SortedSet::new())),
        };
        match &mut self.entries[id].value {
            EntryValue::ZSet(set) => Ok(set.add(member, score)),
            EntryValue::Str(_) => Err(StoreError::WrongType { expected: "zset" }),
        }
    }

    /// The sorted set at `key`. A missing key and a string key both give
    /// `None`.
    pub fn zset(&mut self, key: &[u8]) -> Option<&mut SortedSet> {
        let id = self.find(key)?;
        match &mut self.entries[id].value {
            EntryValue::ZSet(set) => Some(set),
            EntryValue::Str(_) => None,
        }
    }

    /// Removes `member` from the sorted set at `key`.
    pub fn zrem(&mut self, key: &[u8], member: &[u8]) -> bool {
        self.zset(key)
            .and_then(|set| set.pop(member))
            .is_some()
    }

    /// Earliest TTL deadline in the keyspace.
    pub fn next_deadline(&self) -> Option<u64> {
        self.heap.peek_deadline()
    }

    /// Destroys up to `max_work` keys whose deadline is at or before
    /// `now_us`. Returns how many were removed.
    pub fn sweep_expired(&mut self, now_us: u64, max_work: usize) -> usize {
        let mut expired = 0;
        while expired < max_work {
            let Some(id) = self.heap.pop_due(&mut self.entries, now_us) else {
                break;
            };
            self.remove_entry(id);
            expired += 1;
        }
        if expired > 0 {
            debug!(expired, remaining = self.heap.len(), "expired keys swept");
        }
        expired
    }
}
