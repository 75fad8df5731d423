//! # QuillKV - An In-Memory Key-Value and Sorted-Set Server
//!
//! QuillKV keeps string values and sorted sets in memory and serves them
//! over a compact length-prefixed binary protocol. A single thread does all
//! the work: it waits for socket readiness, runs commands and expires keys.
//!
//! ## Features
//!
//! - **Binary Protocol**: Little-endian, length-prefixed requests and typed responses
//! - **Sorted Sets**: Score/name ordering with rank offsets in O(log n)
//! - **TTL Support**: Millisecond expiry driven by a min-heap of deadlines
//! - **Progressive Rehashing**: Table growth never stalls a single request
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              QuillKV                                    │
//! │                                                                         │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐                  │
//! │  │  Reactor    │───>│ Connection  │───>│  Command    │                  │
//! │  │  (poll)     │    │ state mach. │    │  Handler    │                  │
//! │  └──────┬──────┘    └─────────────┘    └──────┬──────┘                  │
//! │         │                                     │                         │
//! │         │ timers                              ▼                         │
//! │         │           ┌──────────────────────────────────────────────┐    │
//! │         │           │                   Store                      │    │
//! │         │           │  ┌───────────┐ ┌───────────┐ ┌────────────┐  │    │
//! │         └──────────>│  │ HashIndex │ │ Expiration│ │ SortedSet  │  │    │
//! │                     │  │ (rehash)  │ │ Heap      │ │ (AVL+hash) │  │    │
//! │                     │  └───────────┘ └───────────┘ └────────────┘  │    │
//! │                     └──────────────────────────────────────────────┘    │
//! │                                                                         │
//! │                     ┌──────────────────────────────────────────────┐    │
//! │                     │  WorkerPool: drops large sorted sets         │    │
//! │                     └──────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use quillkv::{Reactor, ServerConfig};
//!
//! let config = ServerConfig::default();
//! let mut reactor = Reactor::bind(&config)?;
//! let shutdown = reactor.shutdown_handle();
//!
//! std::thread::spawn(move || reactor.run());
//! // ...
//! shutdown.store(true, std::sync::atomic::Ordering::Release);
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Supported Commands
//!
//! - `get key`, `set key value`, `del key`
//! - `keys`, `pexpire key ms`, `pttl key`
//! - `zadd key score member`, `zscore key member`, `zrem key member`
//! - `zquery key score member offset limit`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request decoding, response encoding and value types
//! - [`storage`]: the keyspace and its intrusive data structures
//! - [`commands`]: command dispatch and execution
//! - [`connection`]: connection state machine and the reactor
//! - [`config`]: server tunables
//! - [`time`]: the monotonic microsecond clock
//!
//! ## Design Highlights
//!
//! ### Intrusive Structures over Slabs
//!
//! Hash chains, tree links, heap positions and idle-list links live inside
//! the records they index. Records sit in `slab::Slab` arenas and refer to
//! each other by index, so one record can belong to several structures
//! without reference counting.
//!
//! ### Active Expiry Only
//!
//! Expired keys are removed by the reactor's timer pass, at most
//! `max_expire_per_tick` per tick. A key whose deadline has passed stays
//! visible until that pass reaches it.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;
pub mod time;

// Re-export commonly used types for convenience
pub use commands::CommandHandler;
pub use config::ServerConfig;
pub use connection::{ConnectionStats, Reactor};
pub use protocol::{ParseError, Value};
pub use storage::Store;

/// The default port QuillKV listens on
pub const DEFAULT_PORT: u16 = 1234;

/// The default host QuillKV binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of QuillKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
