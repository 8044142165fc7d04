//! Client configuration.

use std::{path::PathBuf, time::Duration};

use broker_proto::MAX_LINE_LEN;

/// Well-known broker socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/data/misc/db/data_broker.sock";

/// Transport settings
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Time allowed for one connect attempt
    pub connect_timeout: Duration,
    /// Per-read/write deadline. `None` waits until the peer answers or the
    /// client is closed.
    pub io_timeout: Option<Duration>,
    /// Connect attempts per connection (at least one)
    pub connect_attempts: u32,
    /// Delay before the second attempt; grows linearly
    pub connect_backoff: Duration,
    /// Longest accepted response line, terminator included
    pub max_line_len: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            io_timeout: None,
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(100),
            max_line_len: MAX_LINE_LEN,
        }
    }
}

impl TransportConfig {
    /// Fast-failing settings for tests and local tooling.
    pub fn development() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            io_timeout: Some(Duration::from_secs(5)),
            connect_attempts: 1,
            connect_backoff: Duration::from_millis(10),
            max_line_len: MAX_LINE_LEN,
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identity presented in `AUTH`
    pub caller_id: String,
    /// Broker socket path
    pub socket_path: PathBuf,
    /// Transport settings
    pub transport: TransportConfig,
}

impl ClientConfig {
    /// Configuration for `caller_id` with the default socket and transport.
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: caller_id.into(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            transport: TransportConfig::default(),
        }
    }

    /// Override the socket path.
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = path.into();
        self
    }

    /// Override transport settings.
    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }
}
