//! Command Handler Module
//!
//! This module implements every command QuillKV understands. It receives a
//! decoded request (an array of byte strings), runs it against the store and
//! writes the typed response straight into the connection's write buffer.
//!
//! ## Supported Commands
//!
//! ### String Commands
//! - `get key` - Get a string (`Error("Not found")` if absent)
//! - `set key value` - Set a string (`Nil`)
//! - `del key` - Delete a key (`Int` 1 or 0)
//!
//! ### Key Commands
//! - `keys` - List every key
//! - `pexpire key milliseconds` - Set a TTL; a negative value removes it
//! - `pttl key` - Remaining TTL in ms (-1 no TTL, `Error("Not found")` if absent)
//!
//! ### Sorted Set Commands
//! - `zadd key score member` - Add or update a member (`Int` 1 added, 0 updated)
//! - `zscore key member` - Score of a member (`Nil` if not a member)
//! - `zquery key score member offset limit` - Range query from `(score, member)`
//! - `zrem key member` - Remove a member
//!
//! Names are matched exactly and together with their arity; anything else
//! is answered with `Error("Invalid Command")`.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CommandHandler                          │
//! │                                                             │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────────┐  │
//! │  │ execute()   │───>│ dispatch()  │───>│ cmd_*()         │  │
//! │  └─────────────┘    └─────────────┘    └───────┬─────────┘  │
//! │         ▲ Err(CommandError) → Error response   │            │
//! │         └──────────────────────────────────────┤            │
//! │                                                ▼            │
//! │                                  Store + ResponseWriter     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use crate::protocol::ResponseWriter;
use crate::storage::{AddOutcome, Store, StoreError};

/// Failures reported to the client as an `Error` response. The `Display`
/// text is exactly the response payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown name or wrong number of arguments
    #[error("Invalid Command")]
    InvalidCommand,

    /// The key does not exist
    #[error("Not found")]
    NotFound,

    /// The key holds another type
    #[error("expect {expected}")]
    WrongType { expected: &'static str },

    /// An argument that must be an integer is not one
    #[error("expect int")]
    InvalidInteger,

    /// An argument that must be a number is not one (NaN included)
    #[error("expect float")]
    InvalidFloat,
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WrongType { expected } => CommandError::WrongType { expected },
        }
    }
}

type CommandResult = Result<(), CommandError>;

fn parse_int(arg: &[u8]) -> Result<i64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::InvalidInteger)
}

fn parse_float(arg: &[u8]) -> Result<f64, CommandError> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|f| !f.is_nan())
        .ok_or(CommandError::InvalidFloat)
}

/// Runs commands against a store on behalf of one connection.
pub struct CommandHandler<'s> {
    store: &'s mut Store,
    /// Reactor time of the current tick, used for TTL arithmetic
    now_us: u64,
}

impl<'s> CommandHandler<'s> {
    pub fn new(store: &'s mut Store, now_us: u64) -> Self {
        Self { store, now_us }
    }

    /// Executes one request, writing exactly one response value to `out`.
    pub fn execute(&mut self, args: &[Bytes], out: &mut ResponseWriter<'_>) {
        if let Err(err) = self.dispatch(args, out) {
            trace!(error = %err, "command failed");
            out.error(&err.to_string());
        }
    }

    /// Dispatches by name and arity. Handlers only write on success.
    fn dispatch(&mut self, args: &[Bytes], out: &mut ResponseWriter<'_>) -> CommandResult {
        let name = args.first().and_then(|a| std::str::from_utf8(a).ok());
        trace!(cmd = name.unwrap_or("?"), argc = args.len(), "executing command");

        match (name, args.len()) {
            (Some("get"), 2) => self.cmd_get(&args[1], out),
            (Some("set"), 3) => self.cmd_set(&args[1], &args[2], out),
            (Some("del"), 2) => self.cmd_del(&args[1], out),
            (Some("keys"), 1) => self.cmd_keys(out),
            (Some("pexpire"), 3) => self.cmd_pexpire(&args[1], &args[2], out),
            (Some("pttl"), 2) => self.cmd_pttl(&args[1], out),
            (Some("zadd"), 4) => self.cmd_zadd(&args[1], &args[2], &args[3], out),
            (Some("zscore"), 3) => self.cmd_zscore(&args[1], &args[2], out),
            (Some("zquery"), 6) => self.cmd_zquery(&args[1..], out),
            (Some("zrem"), 3) => self.cmd_zrem(&args[1], &args[2], out),
            _ => Err(CommandError::InvalidCommand),
        }
    }

    // ========================================================================
    // String Commands
    // ========================================================================

    fn cmd_get(&mut self, key: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        let value = self.store.get(key)?.ok_or(CommandError::NotFound)?;
        out.string(value);
        Ok(())
    }

    fn cmd_set(&mut self, key: &Bytes, value: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        self.store.set(key.clone(), value.clone());
        out.nil();
        Ok(())
    }

    fn cmd_del(&mut self, key: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        out.integer(self.store.delete(key) as i64);
        Ok(())
    }

    // ========================================================================
    // Key Commands
    // ========================================================================

    fn cmd_keys(&mut self, out: &mut ResponseWriter<'_>) -> CommandResult {
        let mark = out.begin_array();
        let mut count = 0u32;
        self.store.scan_keys(|key| {
            out.string(key);
            count += 1;
        });
        out.end_array(mark, count);
        Ok(())
    }

    /// pexpire key ms
    fn cmd_pexpire(&mut self, key: &Bytes, ms: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        let ttl_ms = parse_int(ms)?;
        let found = self.store.expire(key, ttl_ms, self.now_us);
        out.integer(found as i64);
        Ok(())
    }

    fn cmd_pttl(&mut self, key: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        let ttl = self
            .store
            .ttl_ms(key, self.now_us)
            .ok_or(CommandError::NotFound)?;
        out.integer(ttl);
        Ok(())
    }

    // ========================================================================
    // Sorted Set Commands
    // ========================================================================

    fn cmd_zadd(
        &mut self,
        key: &Bytes,
        score: &Bytes,
        member: &Bytes,
        out: &mut ResponseWriter<'_>,
    ) -> CommandResult {
        let score = parse_float(score)?;
        let outcome = self.store.zadd(key.clone(), score, member.clone())?;
        out.integer((outcome == AddOutcome::Inserted) as i64);
        Ok(())
    }

    fn cmd_zscore(&mut self, key: &Bytes, member: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        let set = self.store.zset(key).ok_or(CommandError::NotFound)?;
        match set.score(member) {
            Some(score) => out.integer(score as i64),
            None => out.nil(),
        }
        Ok(())
    }

    /// zquery key score member offset limit
    ///
    /// Seeks to the first member `>= (score, member)`, moves `offset`
    /// positions, then returns up to `limit` `[member, score]` pairs.
    fn cmd_zquery(&mut self, args: &[Bytes], out: &mut ResponseWriter<'_>) -> CommandResult {
        let score = parse_float(&args[1])?;
        let name = &args[2];
        let offset = parse_int(&args[3])?;
        let limit = parse_int(&args[4])?;
        let set = self.store.zset(&args[0]).ok_or(CommandError::NotFound)?;

        let mark = out.begin_array();
        let mut count = 0u32;
        let limit = usize::try_from(limit).unwrap_or(0);
        for node in set.range(score, name, offset, limit) {
            let pair = out.begin_array();
            out.string(node.name());
            out.integer(node.score() as i64);
            out.end_array(pair, 2);
            count += 1;
        }
        out.end_array(mark, count);
        Ok(())
    }

    fn cmd_zrem(&mut self, key: &Bytes, member: &Bytes, out: &mut ResponseWriter<'_>) -> CommandResult {
        out.integer(self.store.zrem(key, member) as i64);
        Ok(())
    }
}
