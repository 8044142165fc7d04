//! Client errors.

use broker_core::SessionError;
use broker_crypto::AttestationError;
use broker_proto::{CodecError, CommandKind};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by [`crate::BrokerClient`]'s typed API.
///
/// The simple API (`connect`, `get`, `set`, `list_as_map`) collapses these to
/// `false`/`None` after logging them. `Display` is the renderable message.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The token provider could not produce a token.
    #[error("attestation failed: {0}")]
    Attestation(#[from] AttestationError),

    /// The broker socket could not be opened.
    #[error("failed to connect: {0}")]
    Connect(#[source] TransportError),

    /// The broker refused `AUTH`.
    #[error("authentication rejected: {detail}")]
    AuthRejected {
        /// Raw response line
        detail: String,
    },

    /// The channel failed mid-exchange.
    #[error("I/O error: {0}")]
    Io(#[source] TransportError),

    /// The broker's reply did not match the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A caller-supplied field was rejected before anything was sent.
    #[error(transparent)]
    InvalidArgument(CodecError),

    /// The broker answered a command with a failure line.
    #[error("{command} rejected: {detail}")]
    Rejected {
        /// Command that was rejected
        command: CommandKind,
        /// Raw response line
        detail: String,
    },

    /// The client was closed while the call was in flight.
    #[error("aborted: client closed")]
    Aborted,
}

impl ClientError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Connect failures the broker may recover from and lost channels are
    /// transient. Rejections, protocol violations, and invalid arguments
    /// would repeat.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connect(err) => err.is_retryable(),
            Self::Io(err) => err.is_connection_loss(),
            _ => false,
        }
    }

    /// A command that failed this way on a previously healthy session may be
    /// replayed once on a fresh one.
    pub(crate) fn is_stale_session(&self) -> bool {
        matches!(self, Self::Io(err) if err.is_connection_loss())
    }
}

impl From<SessionError> for ClientError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidArgument(codec) => Self::InvalidArgument(codec),
            SessionError::AuthRejected { detail } => Self::AuthRejected { detail },
            SessionError::Rejected { command, detail } => Self::Rejected { command, detail },
            SessionError::ConnectionClosed { .. } => Self::Io(TransportError::Closed),
            SessionError::Protocol(reason) => Self::Protocol(reason),
            SessionError::InvalidState { .. } | SessionError::CommandInFlight { .. } => {
                Self::Protocol(err.to_string())
            },
        }
    }
}
