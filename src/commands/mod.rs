//! Command Handler Module
//!
//! This module implements the command processing layer for QuillKV.
//! It receives decoded requests, executes them against the store, and
//! writes the responses.
//!
//! ## Architecture
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────────┐
//! │ Request Parser  │  (protocol module)
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ CommandHandler  │  (this module)
//! │                 │
//! │  - Dispatch     │
//! │  - Validate     │
//! │  - Execute      │
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ Store           │  (storage module)
//! └─────────────────┘
//! ```
//!
//! ## Supported Commands
//!
//! - Strings: `get`, `set`, `del`
//! - Keys: `keys`, `pexpire`, `pttl`
//! - Sorted sets: `zadd`, `zscore`, `zquery`, `zrem`

pub mod handler;

// Re-export the main command handler
pub use handler::{CommandError, CommandHandler};
