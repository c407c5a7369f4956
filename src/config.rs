//! Server and client configuration
//!
//! Plain structs with defaults; the binaries fill them from clap arguments
//! (which in turn fall back to environment variables).

use std::time::Duration;

use crate::message::ClientMessage;

/// Default listening host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listening port
pub const DEFAULT_PORT: u16 = 3001;

/// Default admission limit
pub const DEFAULT_MAX_CONNECTIONS: usize = 100;

/// Default per-connection outbound queue size
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Default reconnect budget for the client channel
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default bound on a single transport open
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reconnect delay staircase in milliseconds (3s, 6s, 12s, 24s, 30s)
const RECONNECT_DELAYS_MS: [u64; 5] = [3_000, 6_000, 12_000, 24_000, 30_000];

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Connections beyond this count are rejected with `MAX_CONNECTIONS`
    pub max_connections: usize,
    /// Capacity of each connection's outbound queue
    pub outbound_buffer: usize,
}

impl ServerConfig {
    /// `host:port` string suitable for `TcpListener::bind`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

/// Deterministic reconnect schedule
///
/// The delay for attempt `n` is `delays[min(n, len - 1)]`; no jitter.
/// Once `max_attempts` reconnects have been tried without a successful
/// open, the channel gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delays: Vec<Duration>,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Delay before the reconnect that follows `attempt` prior failures
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        self.delays[(attempt as usize).min(last)]
    }

    /// Whether another reconnect may be scheduled after `attempt` tries
    pub fn allows(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delays: RECONNECT_DELAYS_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Client channel configuration
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:3001`
    pub url: String,
    pub reconnect: ReconnectPolicy,
    /// Capacity of the inbound event channel handed to the caller
    ///
    /// The caller must keep draining the receiver: once it is full, further
    /// server events are dropped (and logged) rather than stalling the channel.
    pub event_buffer: usize,
    /// Give up on an open attempt after this long
    pub connect_timeout: Duration,
    /// Event sent first on every new transport, ahead of the queue
    ///
    /// Each transport is a fresh server session, so this is where `join`
    /// goes when queued messages must land in a room.
    pub hello: Option<ClientMessage>,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            event_buffer: 256,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            hello: None,
        }
    }

    /// Send `hello` at the start of every session
    pub fn with_hello(mut self, hello: ClientMessage) -> Self {
        self.hello = Some(hello);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the reconnect budget
    pub fn with_max_reconnect_attempts(mut self, max_attempts: u32) -> Self {
        self.reconnect.max_attempts = max_attempts;
        self
    }
}
