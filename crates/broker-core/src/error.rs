//! Session errors.

use broker_proto::{CodecError, CommandKind};
use thiserror::Error;

use crate::session::SessionState;

/// Errors raised by the session state machine.
///
/// Any error raised while a channel is open leaves the session
/// [`SessionState::Disconnected`]; the driver must close the channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: SessionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// A command is already waiting for its reply (no pipelining)
    #[error("{command} still awaiting its reply")]
    CommandInFlight {
        /// Command that holds the session
        command: CommandKind,
    },

    /// Caller-supplied field rejected before anything was sent
    #[error(transparent)]
    InvalidArgument(CodecError),

    /// Broker refused the `AUTH` line
    #[error("authentication rejected: {detail}")]
    AuthRejected {
        /// Raw response line
        detail: String,
    },

    /// Broker answered a command with a failure line
    #[error("{command} rejected: {detail}")]
    Rejected {
        /// Command that was rejected
        command: CommandKind,
        /// Raw response line
        detail: String,
    },

    /// Peer closed the channel before replying
    #[error("{command} failed: connection closed")]
    ConnectionClosed {
        /// Command that was waiting for a reply
        command: CommandKind,
    },

    /// Reply did not match the command's expected shape
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Returns true if a fresh session may succeed where this one failed.
    ///
    /// Only a channel that died under us qualifies. Rejections and malformed
    /// replies come from a live broker and would repeat.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. })
    }
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::InvalidArgument { .. } => Self::InvalidArgument(err),
            CodecError::Rejected { command: CommandKind::Auth, detail } => {
                Self::AuthRejected { detail }
            },
            CodecError::Rejected { command, detail } => Self::Rejected { command, detail },
            CodecError::ConnectionClosed { command } => Self::ConnectionClosed { command },
            CodecError::MalformedPayload { .. } | CodecError::MalformedRequest(_) => {
                Self::Protocol(err.to_string())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_maps_to_auth_rejected() {
        let err = SessionError::from(CodecError::Rejected {
            command: CommandKind::Auth,
            detail: "ERR:bad token".to_string(),
        });
        assert_eq!(err, SessionError::AuthRejected { detail: "ERR:bad token".to_string() });
    }

    #[test]
    fn only_closed_channel_is_transient() {
        assert!(SessionError::ConnectionClosed { command: CommandKind::Get }.is_transient());
        assert!(
            !SessionError::Rejected { command: CommandKind::Get, detail: "ERR".to_string() }
                .is_transient()
        );
        assert!(!SessionError::Protocol("bad".to_string()).is_transient());
    }
}
