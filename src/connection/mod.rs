//! Connection Module
//!
//! This module owns the network side of QuillKV: the per-client state
//! machine and the single-threaded reactor that drives every client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Reactor                              │
//! │                                                             │
//! │   listener ──accept──> Slab<Connection>  <── idle list      │
//! │                              │                              │
//! │                       poll() readiness                      │
//! │                              ▼                              │
//! │  ┌─────────────┐    ┌──────────────┐    ┌───────────────┐   │
//! │  │ Read bytes  │───>│ Parse request│───>│ CommandHandler│   │
//! │  └─────────────┘    └──────────────┘    └───────┬───────┘   │
//! │                                                 ▼           │
//! │                                        ┌───────────────┐    │
//! │                                        │ Send response │    │
//! │                                        └───────────────┘    │
//! │                                                             │
//! │   timers: idle connections, key expiry (bounded per tick)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Non-blocking I/O**: one `poll(2)` call per tick covers every socket
//! - **Pipelining**: requests already buffered are served back to back
//! - **Idle timeouts**: the stalest connection is always at the list head
//! - **Statistics**: connection, command and byte counters
//!
//! ## Example
//!
//! ```no_run
//! use quillkv::config::ServerConfig;
//! use quillkv::connection::Reactor;
//!
//! let mut reactor = Reactor::bind(&ServerConfig::default())?;
//! reactor.run()?;
//! # Ok::<(), std::io::Error>(())
//! ```

pub mod handler;
pub mod reactor;

// Re-export commonly used types
pub use handler::{ConnState, Connection, ConnectionError, ConnectionStats};
pub use reactor::Reactor;
