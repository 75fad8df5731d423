//! Connection State Machine
//!
//! Every client socket is wrapped in a [`Connection`] that buffers one
//! request and one response at a time. The reactor calls
//! [`Connection::handle_io`] whenever the socket is ready; the connection
//! then works until the socket would block and hands control back.
//!
//! ## Connection Lifecycle
//!
//! ```text
//!            ┌──────────── response flushed ────────────┐
//!            ▼                                          │
//!       ┌─────────┐  request decoded + executed   ┌─────────┐
//!  ───> │ Reading │ ────────────────────────────> │ Writing │
//!       └────┬────┘                               └────┬────┘
//!            │ EOF / I/O error / protocol error        │ I/O error
//!            ▼                                         ▼
//!       ┌──────────────────────────────────────────────────┐
//!       │                     Closing                      │
//!       └──────────────────────────────────────────────────┘
//! ```
//!
//! Idle timeouts also move a connection to `Closing`, but that decision
//! belongs to the reactor.
//!
//! ## Buffer Management
//!
//! The read buffer has a fixed size of `4 + MAX_MSG_SIZE` bytes. A request
//! is removed from its front once fully decoded and any bytes behind it are
//! shifted down, so pipelined requests are served in arrival order. The
//! write buffer holds exactly one pending response frame.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use tracing::trace;

use crate::commands::CommandHandler;
use crate::protocol::{parse_request, ParseError, ResponseWriter, MAX_MSG_SIZE};
use crate::storage::{ListLink, ListLinked, Store};

/// Size of every connection's read buffer.
pub const READ_BUFFER_SIZE: usize = 4 + MAX_MSG_SIZE;

/// Server-wide connection statistics
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently open connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The peer sent a malformed or oversized request
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial request)
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

/// Where a connection is in its request/response cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Waiting for (the rest of) a request
    Reading,
    /// A response is buffered and not yet fully sent
    Writing,
    /// Terminal; the reactor will drop the connection
    Closing,
}

/// A client connection over any non-blocking byte stream.
pub struct Connection<S> {
    stream: S,
    state: ConnState,

    read_buf: Box<[u8]>,
    read_len: usize,

    write_buf: BytesMut,
    write_sent: usize,

    /// Reactor clock reading of the last I/O on this connection
    last_active_us: u64,
    idle_link: ListLink,
}

impl<S: Read + Write> Connection<S> {
    pub fn new(stream: S, now_us: u64) -> Self {
        Self {
            stream,
            state: ConnState::Reading,
            read_buf: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            read_len: 0,
            write_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            write_sent: 0,
            last_active_us: now_us,
            idle_link: ListLink::default(),
        }
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    #[inline]
    pub fn stream(&self) -> &S {
        &self.stream
    }

    #[inline]
    pub fn last_active_us(&self) -> u64 {
        self.last_active_us
    }

    /// Records activity at `now_us`.
    #[inline]
    pub fn touch(&mut self, now_us: u64) {
        self.last_active_us = now_us;
    }

    /// Bytes received but not yet consumed by a complete request.
    pub fn buffered(&self) -> usize {
        self.read_len
    }

    /// Makes as much progress as the socket allows. Any error leaves the
    /// connection in `Closing`.
    pub fn handle_io(
        &mut self,
        store: &mut Store,
        now_us: u64,
        stats: &ConnectionStats,
    ) -> Result<(), ConnectionError> {
        let result = match self.state {
            ConnState::Reading => self.handle_read(store, now_us, stats),
            ConnState::Writing => self.handle_write(store, now_us, stats),
            ConnState::Closing => Ok(()),
        };
        if result.is_err() {
            self.state = ConnState::Closing;
        }
        result
    }

    fn handle_read(
        &mut self,
        store: &mut Store,
        now_us: u64,
        stats: &ConnectionStats,
    ) -> Result<(), ConnectionError> {
        loop {
            // Serve what is already buffered before touching the socket.
            if self.try_one_request(store, now_us, stats)? {
                self.flush(stats)?;
                if self.state == ConnState::Writing {
                    return Ok(());
                }
                continue;
            }
            if !self.fill_buffer(stats)? {
                return Ok(());
            }
        }
    }

    fn handle_write(
        &mut self,
        store: &mut Store,
        now_us: u64,
        stats: &ConnectionStats,
    ) -> Result<(), ConnectionError> {
        self.flush(stats)?;
        if self.state == ConnState::Reading {
            // Pipelined requests may already be waiting in the read buffer.
            self.handle_read(store, now_us, stats)?;
        }
        Ok(())
    }

    /// Decodes and executes one buffered request. Returns false if the
    /// buffer does not hold a complete request yet.
    fn try_one_request(
        &mut self,
        store: &mut Store,
        now_us: u64,
        stats: &ConnectionStats,
    ) -> Result<bool, ConnectionError> {
        let Some((args, consumed)) =
            parse_request(&self.read_buf[..self.read_len], self.read_buf.len())?
        else {
            return Ok(false);
        };

        trace!(argc = args.len(), consumed, remaining = self.read_len - consumed, "parsed request");

        let mut out = ResponseWriter::begin(&mut self.write_buf);
        CommandHandler::new(store, now_us).execute(&args, &mut out);
        out.finish();
        stats.command_processed();

        self.read_buf.copy_within(consumed..self.read_len, 0);
        self.read_len -= consumed;
        self.state = ConnState::Writing;
        Ok(true)
    }

    /// One successful read into the buffer. Returns false on would-block.
    fn fill_buffer(&mut self, stats: &ConnectionStats) -> Result<bool, ConnectionError> {
        if self.read_len == self.read_buf.len() {
            // Unreachable while the parser enforces the same limit.
            return Err(ParseError::MessageTooLarge {
                size: self.read_len,
                max: self.read_buf.len(),
            }
            .into());
        }

        loop {
            match self.stream.read(&mut self.read_buf[self.read_len..]) {
                Ok(0) if self.read_len == 0 => return Err(ConnectionError::ClientDisconnected),
                Ok(0) => return Err(ConnectionError::UnexpectedEof),
                Ok(n) => {
                    self.read_len += n;
                    stats.bytes_read(n);
                    trace!(bytes = n, buffered = self.read_len, "read data");
                    return Ok(true);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes the pending response. Ends in `Reading` once it is fully
    /// sent, or in `Writing` if the socket would block.
    fn flush(&mut self, stats: &ConnectionStats) -> Result<(), ConnectionError> {
        while self.write_sent < self.write_buf.len() {
            match self.stream.write(&self.write_buf[self.write_sent..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => {
                    self.write_sent += n;
                    stats.bytes_written(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.state = ConnState::Writing;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }

        trace!(bytes = self.write_sent, "sent response");
        self.write_buf.clear();
        self.write_sent = 0;
        self.state = ConnState::Reading;
        Ok(())
    }
}

impl<S> ListLinked for Connection<S> {
    fn list_link(&self) -> &ListLink {
        &self.idle_link
    }
    fn list_link_mut(&mut self) -> &mut ListLink {
        &mut self.idle_link
    }
}
