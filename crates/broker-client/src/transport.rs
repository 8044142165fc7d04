//! Line-framed transport.
//!
//! A [`LineChannel`] wraps any byte stream and moves whole `\n`-terminated
//! lines. [`UnixConnector`] opens channels to the broker socket. Protocol logic
//! stays in the Sans-IO [`broker_core::Session`].

use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use broker_proto::LINE_TERMINATOR;
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::UnixStream,
};

use crate::config::TransportConfig;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Nothing is listening at the socket path.
    #[error("broker socket {endpoint} not found")]
    NotFound {
        /// Socket path or endpoint description
        endpoint: String,
    },

    /// The socket exists but refused the connection.
    #[error("connection to {endpoint} refused")]
    Refused {
        /// Socket path or endpoint description
        endpoint: String,
    },

    /// The OS denied access to the socket.
    #[error("permission denied opening {endpoint}")]
    PermissionDenied {
        /// Socket path or endpoint description
        endpoint: String,
    },

    /// Connect did not complete in time.
    #[error("connecting to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Socket path or endpoint description
        endpoint: String,
        /// Configured connect timeout
        timeout: Duration,
    },

    /// A read or write did not complete in time.
    #[error("I/O timed out after {0:?}")]
    IoTimeout(Duration),

    /// The channel is closed (by the peer or locally).
    #[error("connection closed")]
    Closed,

    /// The peer sent a line longer than the configured limit.
    #[error("response line exceeds {limit} bytes")]
    LineTooLong {
        /// Configured limit
        limit: usize,
    },

    /// Outgoing text contained a terminator, or incoming text was not UTF-8.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Classify a connect failure.
    pub fn from_connect(endpoint: &str, err: io::Error) -> Self {
        let endpoint = endpoint.to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound { endpoint },
            io::ErrorKind::ConnectionRefused => Self::Refused { endpoint },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { endpoint },
            _ => Self::Io(err),
        }
    }

    /// Returns true if another connect attempt may succeed (broker starting
    /// up, busy).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::Refused { .. } | Self::ConnectTimeout { .. })
    }

    /// Returns true if an established channel was lost.
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, Self::Closed | Self::Io(_))
    }
}

/// Opens channels to the broker.
pub trait Connector: Send + Sync + 'static {
    /// Byte stream carried by the channel.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open one channel. Fails fast; retries are the caller's decision.
    fn open(
        &self,
    ) -> impl Future<Output = Result<LineChannel<Self::Stream>, TransportError>> + Send;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// One bidirectional line-framed channel.
///
/// Exclusively owns its stream. [`LineChannel::close`] is idempotent, and
/// dropping the channel releases the descriptor on every other path.
#[derive(Debug)]
pub struct LineChannel<S> {
    stream: Option<S>,
    buffer: BytesMut,
    max_line_len: usize,
    io_timeout: Option<Duration>,
}

impl<S> LineChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an open stream.
    pub fn new(stream: S, config: &TransportConfig) -> Self {
        Self {
            stream: Some(stream),
            buffer: BytesMut::with_capacity(1024),
            max_line_len: config.max_line_len,
            io_timeout: config.io_timeout,
        }
    }

    /// True once [`LineChannel::close`] ran.
    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Write `text` followed by `\n` as one frame.
    ///
    /// The whole frame is assembled before the first byte is written.
    ///
    /// # Errors
    ///
    /// - `TransportError::InvalidFrame` if `text` contains a line terminator
    /// - `TransportError::Closed` if the channel was closed
    /// - `TransportError::Io` on write failure (e.g. broken pipe)
    pub async fn send_line(&mut self, text: &str) -> Result<(), TransportError> {
        if text.bytes().any(|b| b == LINE_TERMINATOR || b == b'\r') {
            return Err(TransportError::InvalidFrame("line contains a terminator".to_string()));
        }

        let mut frame = BytesMut::with_capacity(text.len() + 1);
        frame.put_slice(text.as_bytes());
        frame.put_u8(LINE_TERMINATOR);

        let timeout = self.io_timeout;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;

        with_timeout(timeout, async {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            Ok::<(), TransportError>(())
        })
        .await
    }

    /// Read one line, without its terminator (and a trailing `\r`).
    ///
    /// Returns `Ok(None)` when the peer closes the stream; an unterminated
    /// partial line at end-of-stream is discarded.
    ///
    /// # Errors
    ///
    /// - `TransportError::LineTooLong` if the line, terminator included,
    ///   exceeds the configured limit
    /// - `TransportError::InvalidFrame` if the line is not UTF-8
    /// - `TransportError::Closed` if the channel was closed locally
    pub async fn read_line(&mut self) -> Result<Option<String>, TransportError> {
        let timeout = self.io_timeout;
        let max_line_len = self.max_line_len;
        let Self { stream, buffer, .. } = self;
        let stream = stream.as_mut().ok_or(TransportError::Closed)?;

        with_timeout(timeout, async {
            loop {
                if let Some(end) = buffer.iter().position(|&b| b == LINE_TERMINATOR) {
                    if end + 1 > max_line_len {
                        return Err(TransportError::LineTooLong { limit: max_line_len });
                    }

                    let mut line = buffer.split_to(end + 1);
                    line.truncate(end);
                    if line.last() == Some(&b'\r') {
                        line.truncate(end - 1);
                    }

                    return String::from_utf8(line.to_vec())
                        .map(Some)
                        .map_err(|e| TransportError::InvalidFrame(e.to_string()));
                }

                if buffer.len() >= max_line_len {
                    return Err(TransportError::LineTooLong { limit: max_line_len });
                }

                // Never buffer past the limit
                let remaining = (max_line_len - buffer.len()) as u64;
                if (&mut *stream).take(remaining).read_buf(buffer).await? == 0 {
                    buffer.clear();
                    return Ok(None);
                }
            }
        })
        .await
    }

    /// Close the channel. Idempotent.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.shutdown().await;
        }
        self.buffer.clear();
    }
}

async fn with_timeout<T, F>(timeout: Option<Duration>, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match timeout {
        Some(limit) => {
            tokio::time::timeout(limit, fut).await.map_err(|_| TransportError::IoTimeout(limit))?
        },
        None => fut.await,
    }
}

/// Connect to the broker socket at `path`.
///
/// # Errors
///
/// - `TransportError::NotFound`, `Refused`, `PermissionDenied` per the OS
/// - `TransportError::ConnectTimeout` after `config.connect_timeout`
pub async fn connect(
    path: &Path,
    config: &TransportConfig,
) -> Result<LineChannel<UnixStream>, TransportError> {
    let endpoint = path.display().to_string();

    let stream = tokio::time::timeout(config.connect_timeout, UnixStream::connect(path))
        .await
        .map_err(|_| TransportError::ConnectTimeout {
            endpoint: endpoint.clone(),
            timeout: config.connect_timeout,
        })?
        .map_err(|e| TransportError::from_connect(&endpoint, e))?;

    Ok(LineChannel::new(stream, config))
}

/// Connector for the broker's Unix domain socket.
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
    config: TransportConfig,
}

impl UnixConnector {
    /// Connector for the socket at `path`.
    pub fn new(path: impl Into<PathBuf>, config: TransportConfig) -> Self {
        Self { path: path.into(), config }
    }

    /// Socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for UnixConnector {
    type Stream = UnixStream;

    fn open(&self) -> impl Future<Output = Result<LineChannel<UnixStream>, TransportError>> + Send {
        connect(&self.path, &self.config)
    }

    fn endpoint(&self) -> String {
        self.path.display().to_string()
    }
}
