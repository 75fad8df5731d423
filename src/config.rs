//! Server configuration.
//!
//! A single `ServerConfig` value is built at startup (from the command line
//! in `main`, or directly in tests) and handed to the reactor, which owns
//! it for the lifetime of the process.

use std::time::Duration;

/// Tunables for the reactor and the storage engine.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Listen backlog passed to `listen(2)`
    pub backlog: i32,

    /// Connections with no activity for this long are closed
    pub idle_timeout: Duration,

    /// Upper bound on a single poll wait, even with no timers pending
    pub max_poll_timeout: Duration,

    /// Most keys the expiry sweep removes in one reactor tick
    pub max_expire_per_tick: usize,

    /// Worker threads for deferred disposal of large sorted sets (0 = inline)
    pub dispose_threads: usize,

    /// Sorted sets with more members than this are disposed off-thread
    pub large_zset_threshold: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: crate::DEFAULT_HOST.to_string(),
            port: crate::DEFAULT_PORT,
            backlog: 128,
            idle_timeout: Duration::from_secs(30),
            max_poll_timeout: Duration::from_secs(1),
            max_expire_per_tick: 2000,
            dispose_threads: 4,
            large_zset_threshold: 1000,
        }
    }
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address(), "127.0.0.1:1234");
        assert_eq!(config.max_expire_per_tick, 2000);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
    }
}
