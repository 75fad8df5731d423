//! Single-Threaded Reactor
//!
//! The reactor owns the listening socket, every client connection and the
//! store. One thread runs [`Reactor::run`], which repeats [`Reactor::tick`]
//! until shutdown is requested:
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ tick()                                                       │
//!   │                                                              │
//!   │  1. timeout = min(idle head deadline, next TTL, poll cap)    │
//!   │  2. poll(listener + every connection)                        │
//!   │  3. accept all pending clients (non-blocking)                │
//!   │  4. handle_io() on each ready connection, move it to the     │
//!   │     tail of the idle list, drop it if it is Closing          │
//!   │  5. close connections idle past the timeout (from the head)  │
//!   │  6. sweep a bounded number of expired keys                   │
//!   └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is shared with other threads except the shutdown flag and the
//! statistics counters, so the store needs no locking.

use std::io::{self, ErrorKind};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use slab::Slab;
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::handler::{ConnState, Connection, ConnectionError, ConnectionStats};
use crate::config::ServerConfig;
use crate::storage::{IntrusiveList, Store};
use crate::time::{duration_us, now_us};

/// Event loop serving every client from one thread.
pub struct Reactor {
    listener: TcpListener,
    conns: Slab<Connection<TcpStream>>,
    /// Connections ordered by last activity, stalest first
    idle: IntrusiveList,
    store: Store,
    config: ServerConfig,
    stats: Arc<ConnectionStats>,
    shutdown: Arc<AtomicBool>,
}

impl Reactor {
    /// Wraps an already-bound listener.
    pub fn new(listener: TcpListener, config: ServerConfig) -> io::Result<Self> {
        listener.set_nonblocking(true)?;
        Ok(Self {
            listener,
            conns: Slab::new(),
            idle: IntrusiveList::new(),
            store: Store::with_config(&config),
            config,
            stats: Arc::new(ConnectionStats::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Binds the configured address with `SO_REUSEADDR` and the configured
    /// backlog.
    pub fn bind(config: &ServerConfig) -> io::Result<Self> {
        let addr = config
            .bind_address()
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    ErrorKind::InvalidInput,
                    format!("no address for {}", config.bind_address()),
                )
            })?;

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(config.backlog)?;

        Self::new(socket.into(), config.clone())
    }

    /// Setting the returned flag makes [`run`](Self::run) return after the
    /// current tick.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Runs ticks until shutdown is requested.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = ?self.local_addr().ok(), "reactor started");
        while !self.shutdown.load(Ordering::Acquire) {
            self.tick()?;
        }
        info!(connections = self.conns.len(), keys = self.store.len(), "reactor stopped");
        Ok(())
    }

    /// One round of waiting, I/O and timer processing.
    pub fn tick(&mut self) -> io::Result<()> {
        let timeout = self.poll_timeout_ms(now_us());

        let mut ready = Vec::new();
        let listener_ready;
        {
            let mut ids = Vec::with_capacity(self.conns.len());
            let mut fds = Vec::with_capacity(self.conns.len() + 1);
            fds.push(PollFd::new(&self.listener, PollFlags::POLLIN));
            for (id, conn) in self.conns.iter() {
                let mut events = PollFlags::POLLERR;
                match conn.state() {
                    ConnState::Reading => events |= PollFlags::POLLIN,
                    ConnState::Writing => events |= PollFlags::POLLOUT,
                    ConnState::Closing => {}
                }
                ids.push(id);
                fds.push(PollFd::new(conn.stream(), events));
            }

            match poll(&mut fds, timeout) {
                // revents stay empty when interrupted, so nothing is ready
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(e.into()),
            }

            let is_ready = |fd: &PollFd<'_>| fd.revents().map_or(false, |r| !r.is_empty());
            listener_ready = is_ready(&fds[0]);
            for (&id, fd) in ids.iter().zip(&fds[1..]) {
                if is_ready(fd) {
                    ready.push(id);
                }
            }
        }

        if listener_ready {
            self.accept_pending();
        }

        let now = now_us();
        for id in ready {
            let closing = match self.conns.get_mut(id) {
                Some(conn) => {
                    if let Err(err) = conn.handle_io(&mut self.store, now, &self.stats) {
                        log_connection_error(id, &err);
                    }
                    conn.touch(now);
                    conn.state() == ConnState::Closing
                }
                None => continue,
            };

            if closing {
                self.close_connection(id);
            } else {
                self.idle.push_back(&mut self.conns, id);
            }
        }

        self.process_timers();
        Ok(())
    }

    /// Milliseconds until the nearest timer, rounded up, never more than
    /// the configured cap.
    fn poll_timeout_ms(&self, now: u64) -> i32 {
        let mut deadline = now.saturating_add(duration_us(self.config.max_poll_timeout));

        if let Some(conn) = self.idle.front().and_then(|id| self.conns.get(id)) {
            let idle_deadline = conn
                .last_active_us()
                .saturating_add(duration_us(self.config.idle_timeout));
            deadline = deadline.min(idle_deadline);
        }
        if let Some(ttl_deadline) = self.store.next_deadline() {
            deadline = deadline.min(ttl_deadline);
        }

        let wait_ms = deadline.saturating_sub(now).div_ceil(1000);
        i32::try_from(wait_ms).unwrap_or(i32::MAX)
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!(client = %addr, error = %e, "failed to make socket non-blocking");
                        continue;
                    }
                    let _ = stream.set_nodelay(true);

                    let id = self.conns.insert(Connection::new(stream, now_us()));
                    self.idle.push_back(&mut self.conns, id);
                    self.stats.connection_opened();
                    info!(client = %addr, conn_id = id, "New connection");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    // Typically EMFILE; retry on the next readiness report
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
        }
    }

    fn close_connection(&mut self, id: usize) {
        if !self.conns.contains(id) {
            return;
        }
        self.idle.detach(&mut self.conns, id);
        self.conns.remove(id);
        self.stats.connection_closed();
        debug!(conn_id = id, open = self.conns.len(), "connection closed");
    }

    fn process_timers(&mut self) {
        let now = now_us();
        let idle_us = duration_us(self.config.idle_timeout);

        while let Some(id) = self.idle.front() {
            let stale = self
                .conns
                .get(id)
                .map_or(true, |conn| conn.last_active_us().saturating_add(idle_us) <= now);
            if !stale {
                break;
            }
            self.idle.pop_front(&mut self.conns);
            info!(conn_id = id, "closing idle connection");
            self.close_connection(id);
        }

        self.store.sweep_expired(now, self.config.max_expire_per_tick);
    }
}

fn log_connection_error(id: usize, err: &ConnectionError) {
    match err {
        ConnectionError::ClientDisconnected => {
            debug!(conn_id = id, "Client disconnected");
        }
        ConnectionError::Parse(e) => {
            warn!(conn_id = id, error = %e, "protocol error, closing connection");
        }
        _ => {
            warn!(conn_id = id, error = %err, "Connection error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_request, parse_value, Value, MAX_MSG_SIZE};
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct TestServer {
        addr: SocketAddr,
        stats: Arc<ConnectionStats>,
        shutdown: Arc<AtomicBool>,
        thread: Option<JoinHandle<io::Result<()>>>,
    }

    impl TestServer {
        fn start(mut config: ServerConfig) -> Self {
            config.host = "127.0.0.1".to_string();
            config.port = 0;
            config.max_poll_timeout = Duration::from_millis(20);

            let mut reactor = Reactor::bind(&config).unwrap();
            let addr = reactor.local_addr().unwrap();
            let stats = reactor.stats();
            let shutdown = reactor.shutdown_handle();
            let thread = std::thread::spawn(move || reactor.run());
            Self {
                addr,
                stats,
                shutdown,
                thread: Some(thread),
            }
        }

        async fn connect(&self) -> tokio::net::TcpStream {
            tokio::net::TcpStream::connect(self.addr).await.unwrap()
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.store(true, Ordering::Release);
            if let Some(thread) = self.thread.take() {
                thread.join().unwrap().unwrap();
            }
        }
    }

    async fn read_response(stream: &mut tokio::net::TcpStream) -> Value {
        let mut len = [0u8; 4];
        stream.read_exact(&mut len).await.unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len) as usize];
        stream.read_exact(&mut body).await.unwrap();
        let (value, used) = parse_value(&body).unwrap();
        assert_eq!(used, body.len());
        value
    }

    async fn request(stream: &mut tokio::net::TcpStream, args: &[&str]) -> Value {
        stream.write_all(&encode_request(args)).await.unwrap();
        read_response(stream).await
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        assert_eq!(request(&mut client, &["set", "name", "quill"]).await, Value::Nil);
        assert_eq!(
            request(&mut client, &["get", "name"]).await,
            Value::string("quill")
        );
        assert_eq!(
            request(&mut client, &["get", "missing"]).await,
            Value::error("Not found")
        );
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        assert_eq!(
            request(&mut client, &["GET", "k"]).await,
            Value::error("Invalid Command")
        );
        assert_eq!(
            request(&mut client, &["get"]).await,
            Value::error("Invalid Command")
        );
    }

    #[tokio::test]
    async fn test_delete_twice() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        request(&mut client, &["set", "k", "v"]).await;
        assert_eq!(request(&mut client, &["del", "k"]).await, Value::integer(1));
        assert_eq!(request(&mut client, &["del", "k"]).await, Value::integer(0));
    }

    #[tokio::test]
    async fn test_sorted_set_query() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        assert_eq!(request(&mut client, &["zadd", "z", "2", "b"]).await, Value::integer(1));
        assert_eq!(request(&mut client, &["zadd", "z", "1", "a"]).await, Value::integer(1));
        assert_eq!(request(&mut client, &["zadd", "z", "3", "c"]).await, Value::integer(1));
        assert_eq!(request(&mut client, &["zadd", "z", "1", "a"]).await, Value::integer(0));

        let result = request(&mut client, &["zquery", "z", "1", "", "0", "10"]).await;
        let names: Vec<&str> = result
            .as_array()
            .unwrap()
            .iter()
            .map(|pair| pair.as_array().unwrap()[0].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        assert_eq!(request(&mut client, &["zrem", "z", "b"]).await, Value::integer(1));
        assert_eq!(request(&mut client, &["zscore", "z", "b"]).await, Value::Nil);
    }

    #[tokio::test]
    async fn test_pexpire_zero_removes_key() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        request(&mut client, &["set", "k", "v"]).await;
        assert_eq!(request(&mut client, &["pttl", "k"]).await, Value::integer(-1));
        assert_eq!(request(&mut client, &["pexpire", "k", "0"]).await, Value::integer(1));
        assert_eq!(
            request(&mut client, &["get", "k"]).await,
            Value::error("Not found")
        );
        assert_eq!(
            request(&mut client, &["pttl", "k"]).await,
            Value::error("Not found")
        );
    }

    #[tokio::test]
    async fn test_pipelined_requests() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        let mut batch = Vec::new();
        for i in 0..50 {
            let key = format!("k{i}");
            let value = i.to_string();
            batch.extend(encode_request(&["set", key.as_str(), value.as_str()]));
            batch.extend(encode_request(&["get", key.as_str()]));
        }
        client.write_all(&batch).await.unwrap();

        for i in 0..50 {
            assert_eq!(read_response(&mut client).await, Value::Nil);
            assert_eq!(
                read_response(&mut client).await,
                Value::string(i.to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_clients_share_the_store() {
        let server = TestServer::start(ServerConfig::default());
        let mut writer = server.connect().await;
        let mut reader = server.connect().await;

        request(&mut writer, &["set", "shared", "yes"]).await;
        assert_eq!(
            request(&mut reader, &["get", "shared"]).await,
            Value::string("yes")
        );
        assert_eq!(server.stats.connections_accepted.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn test_oversized_request_closes_connection() {
        let server = TestServer::start(ServerConfig::default());
        let mut client = server.connect().await;

        let mut header = Vec::new();
        header.extend_from_slice(&1u32.to_le_bytes());
        header.extend_from_slice(&(MAX_MSG_SIZE as u32 + 1).to_le_bytes());
        client.write_all(&header).await.unwrap();

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let server = TestServer::start(ServerConfig {
            idle_timeout: Duration::from_millis(100),
            ..ServerConfig::default()
        });
        let mut client = server.connect().await;
        assert_eq!(request(&mut client, &["keys"]).await, Value::array(vec![]));

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_idle_pass_closes_every_stale_connection() {
        let config = ServerConfig {
            port: 0,
            idle_timeout: Duration::from_millis(30),
            max_poll_timeout: Duration::from_millis(10),
            ..ServerConfig::default()
        };
        let mut reactor = Reactor::bind(&config).unwrap();
        let addr = reactor.local_addr().unwrap();
        let _first = std::net::TcpStream::connect(addr).unwrap();
        let _second = std::net::TcpStream::connect(addr).unwrap();

        let give_up = std::time::Instant::now() + Duration::from_secs(5);
        while reactor.connection_count() < 2 && std::time::Instant::now() < give_up {
            reactor.tick().unwrap();
        }
        assert_eq!(reactor.connection_count(), 2);
        assert_eq!(reactor.idle.len(), 2);

        std::thread::sleep(Duration::from_millis(60));
        reactor.tick().unwrap();
        assert_eq!(reactor.connection_count(), 0);
        assert!(reactor.idle.is_empty());
        assert_eq!(reactor.stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_poll_timeout_follows_nearest_timer() {
        let config = ServerConfig {
            port: 0,
            max_poll_timeout: Duration::from_secs(1),
            ..ServerConfig::default()
        };
        let mut reactor = Reactor::bind(&config).unwrap();
        assert_eq!(reactor.poll_timeout_ms(0), 1000);

        reactor.store.set("k".into(), "v".into());
        reactor.store.expire(b"k", 250, 0);
        assert_eq!(reactor.poll_timeout_ms(0), 250);
        assert_eq!(reactor.poll_timeout_ms(100_500), 150);
        // Overdue timers mean no waiting at all
        assert_eq!(reactor.poll_timeout_ms(10_000_000), 0);
    }
}
