//! Codec errors.

use thiserror::Error;

use crate::CommandKind;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Errors produced while encoding requests or decoding replies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Caller-supplied field would break line framing or field splitting.
    ///
    /// Always raised before any byte is produced.
    #[error("invalid {field}: {reason}")]
    InvalidArgument {
        /// Which field was rejected (`key`, `value`, `caller_id`, `token`)
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// Broker answered with a non-`OK:` line.
    #[error("{command} rejected: {detail}")]
    Rejected {
        /// Command that was rejected
        command: CommandKind,
        /// Raw response line
        detail: String,
    },

    /// Peer closed the channel before a response line arrived.
    #[error("{command} failed: connection closed")]
    ConnectionClosed {
        /// Command that was waiting for a reply
        command: CommandKind,
    },

    /// `OK:` line whose payload does not match the command's reply shape.
    #[error("malformed {command} payload: {reason}")]
    MalformedPayload {
        /// Command whose payload failed to parse
        command: CommandKind,
        /// What was wrong with it
        reason: String,
    },

    /// Line could not be parsed as a request (broker side).
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}

impl CodecError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument { field, reason: reason.into() }
    }

    /// Returns true if the error was caused by caller input rather than the
    /// peer.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}
