//! Storage Engine Module
//!
//! This module provides the in-memory data engine for QuillKV: the keyspace
//! and the intrusive data structures it is built from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Store                              │
//! │  ┌──────────────┐   ┌────────────────┐   ┌────────────────┐  │
//! │  │ Slab<Entry>  │◄──│   HashIndex    │   │ ExpirationHeap │  │
//! │  │ Str | ZSet   │◄──┼────────────────┼───│  (deadlines)   │  │
//! │  └──────┬───────┘   └────────────────┘   └────────────────┘  │
//! │         │ ZSet                                               │
//! │  ┌──────▼──────────────────────────────┐   ┌──────────────┐  │
//! │  │ SortedSet: HashIndex + AVL tree     │──►│ WorkerPool   │  │
//! │  └─────────────────────────────────────┘   │ (disposal)   │  │
//! │                                            └──────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Progressive Rehashing**: resizes move at most 128 buckets per call
//! - **Order Statistics**: sorted-set range queries start at any offset in O(log n)
//! - **TTL Support**: per-key deadlines in a min-heap, swept in bounded batches
//! - **Intrusive Links**: structures store slab keys, never pointers
//!
//! ## Example
//!
//! ```
//! use quillkv::storage::Store;
//! use bytes::Bytes;
//!
//! let mut store = Store::new();
//!
//! store.set(Bytes::from("name"), Bytes::from("Ariz"));
//! assert_eq!(store.get(b"name"), Ok(Some(&Bytes::from("Ariz"))));
//!
//! store.zadd(Bytes::from("board"), 5.0, Bytes::from("m1")).unwrap();
//! store.zadd(Bytes::from("board"), 3.0, Bytes::from("m2")).unwrap();
//! let names: Vec<_> = store
//!     .zset(b"board")
//!     .unwrap()
//!     .range(0.0, b"", 0, 10)
//!     .map(|node| node.name().clone())
//!     .collect();
//! assert_eq!(names, vec!["m2", "m1"]);
//! ```

pub mod avl;
pub mod dropper;
pub mod engine;
pub mod expiry;
pub mod hash;
pub mod list;
pub mod zset;

pub use dropper::WorkerPool;
pub use engine::{Entry, EntryValue, Store, StoreError};
pub use expiry::ExpirationHeap;
pub use hash::{str_hash, HashIndex};
pub use list::{IntrusiveList, ListLink, ListLinked};
pub use zset::{AddOutcome, SortedSet, ZNode};
