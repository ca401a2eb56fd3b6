//! Server configuration

use std::net::SocketAddr;
use std::time::Duration;

use crate::protocol::constants::*;

/// Default interval between registry sweeps
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Server configuration options
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Outgoing chunk size announced after the handshake
    pub chunk_size: u32,

    /// Window acknowledgement size sent to the peer
    pub window_ack_size: u32,

    /// Peer bandwidth limit
    pub peer_bandwidth: u32,

    /// Handshake must complete within this time
    pub handshake_timeout: Duration,

    /// Publisher is dropped when nothing arrives for this long
    pub recv_timeout: Duration,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,

    /// Application-level read buffer size
    pub read_buffer_size: usize,

    /// Application-level write buffer size
    pub write_buffer_size: usize,

    /// Messages a player waits for before writing a batch
    pub mw_min_msgs: usize,

    /// Longest a player waits for `mw_min_msgs` before writing what it has
    pub mw_wait: Duration,

    /// Largest batch a player writes at once
    pub mw_max_batch: usize,

    /// Registry sweep interval
    pub cleanup_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], RTMP_PORT)),
            max_connections: 0,
            chunk_size: RECOMMENDED_CHUNK_SIZE,
            window_ack_size: DEFAULT_WINDOW_ACK_SIZE,
            peer_bandwidth: DEFAULT_PEER_BANDWIDTH,
            handshake_timeout: Duration::from_secs(10),
            recv_timeout: Duration::from_secs(30),
            tcp_nodelay: true, // Important for low latency
            read_buffer_size: 64 * 1024,
            write_buffer_size: 64 * 1024,
            mw_min_msgs: 8,
            mw_wait: Duration::from_millis(350),
            mw_max_batch: 128,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom bind address
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self {
            bind_addr: addr,
            ..Default::default()
        }
    }

    /// Set the bind address
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set chunk size, clamped to the legal range
    pub fn chunk_size(mut self, size: u32) -> Self {
        self.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn recv_timeout(mut self, timeout: Duration) -> Self {
        self.recv_timeout = timeout;
        self
    }

    /// Player write batching: wait for `min_msgs` messages, at most `wait`
    pub fn merged_write(mut self, min_msgs: usize, wait: Duration) -> Self {
        self.mw_min_msgs = min_msgs.max(1);
        self.mw_wait = wait;
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}
