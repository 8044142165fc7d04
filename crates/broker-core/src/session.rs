//! Session state machine.
//!
//! Drives one broker session through connect, authenticate, and command
//! exchange. Uses the action pattern: methods take the outcome of the last
//! I/O step and return [`SessionAction`]s for the driver to execute.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ begin_connect ┌────────────┐ channel_opened ┌────────────────┐
//! │ Disconnected │──────────────>│ Connecting │───────────────>│ Authenticating │
//! └──────────────┘               └────────────┘                └────────────────┘
//!        ^                             │ transport_failed              │ OK:
//!        │                             ↓                               ↓
//!        │<───────────────────── (any failure) ──────────────── ┌───────┐
//!        │                                                      │ Ready │
//!        └─────────── failure reply / transport failure / close ─└───────┘
//! ```
//!
//! # Invariants
//!
//! - No `GET`/`SET`/`LIST` is emitted unless the state is `Ready`.
//! - At most one request is awaiting a reply (no pipelining).
//! - Every failure while a channel is open ends in `Disconnected`, and a
//!   session is never reused after a failed `AUTH`.

use broker_proto::{AuthGrant, CommandKind, Reply, Request, validate_caller_id};

use crate::error::SessionError;

/// Actions returned by the session state machine.
///
/// The driver executes these in order:
/// - `OpenChannel`: connect the transport
/// - `Send`: encode the request as one line and write it
/// - `ReadLine`: read one response line (or end-of-stream)
/// - `CloseChannel`: release the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a channel to the broker
    OpenChannel,

    /// Write this request
    Send(Request),

    /// Read exactly one reply line
    ReadLine,

    /// Close the channel
    CloseChannel {
        /// Reason for closing
        reason: String,
    },
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel
    Disconnected,
    /// Channel being opened
    Connecting,
    /// Channel open, `AUTH` not yet accepted
    Authenticating,
    /// Authenticated; commands may be sent
    Ready,
}

impl SessionState {
    /// Stable numeric encoding, for publishing through an atomic.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Authenticating => 2,
            Self::Ready => 3,
        }
    }

    /// Inverse of [`SessionState::as_u8`]. Unknown values read as
    /// `Disconnected`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Connecting,
            2 => Self::Authenticating,
            3 => Self::Ready,
            _ => Self::Disconnected,
        }
    }
}

/// Broker session state machine
///
/// Pure: no I/O, no clock. One instance per client; it outlives individual
/// channels and is reset to `Disconnected` whenever a channel is lost.
#[derive(Debug, Clone)]
pub struct Session {
    /// Identity presented in `AUTH`
    caller_id: String,
    /// Current state
    state: SessionState,
    /// Whether the driver holds an open channel
    channel_open: bool,
    /// Request awaiting its reply
    in_flight: Option<CommandKind>,
    /// Grant from the last successful `AUTH` on the current channel
    grant: Option<AuthGrant>,
}

impl Session {
    /// Create a disconnected session for `caller_id`.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidArgument` if the caller id cannot be framed in
    ///   an `AUTH` line
    pub fn new(caller_id: impl Into<String>) -> Result<Self, SessionError> {
        let caller_id = caller_id.into();
        validate_caller_id(&caller_id).map_err(SessionError::InvalidArgument)?;

        Ok(Self {
            caller_id,
            state: SessionState::Disconnected,
            channel_open: false,
            in_flight: None,
            grant: None,
        })
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Caller identity presented in `AUTH`.
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// True when commands may be sent.
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// Grant from the current session's `AUTH`. `None` unless `Ready`.
    pub fn auth_grant(&self) -> Option<&AuthGrant> {
        self.grant.as_ref()
    }

    /// Request currently awaiting its reply.
    pub fn in_flight(&self) -> Option<CommandKind> {
        self.in_flight
    }

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not `Disconnected`
    pub fn begin_connect(&mut self) -> Result<Vec<SessionAction>, SessionError> {
        self.require(SessionState::Disconnected, "begin_connect")?;

        self.state = SessionState::Connecting;
        Ok(vec![SessionAction::OpenChannel])
    }

    /// Record that the channel is open. The driver requests a token next.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not `Connecting`
    pub fn channel_opened(&mut self) -> Result<(), SessionError> {
        self.require(SessionState::Connecting, "channel_opened")?;

        self.channel_open = true;
        self.state = SessionState::Authenticating;
        Ok(())
    }

    /// Send `AUTH` with a freshly generated token.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not `Authenticating` or `AUTH` was
    ///   already sent on this channel
    /// - `SessionError::InvalidArgument` if the token cannot be framed; the
    ///   session is torn down
    pub fn authenticate(&mut self, token: &str) -> Result<Vec<SessionAction>, SessionError> {
        self.require(SessionState::Authenticating, "authenticate")?;
        if let Some(command) = self.in_flight {
            return Err(SessionError::CommandInFlight { command });
        }

        let request = match Request::auth(self.caller_id.clone(), token) {
            Ok(request) => request,
            Err(err) => {
                self.teardown();
                return Err(SessionError::InvalidArgument(err));
            },
        };

        self.in_flight = Some(CommandKind::Auth);
        Ok(vec![SessionAction::Send(request), SessionAction::ReadLine])
    }

    /// Process the `AUTH` reply. `None` means end-of-stream.
    ///
    /// Transitions to `Ready` on `OK:`. Anything else tears the session down.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if no `AUTH` is awaiting a reply
    /// - `SessionError::AuthRejected` for a failure line
    /// - `SessionError::ConnectionClosed` on end-of-stream
    pub fn handle_auth_response(&mut self, line: Option<&str>) -> Result<AuthGrant, SessionError> {
        if self.state != SessionState::Authenticating || self.in_flight != Some(CommandKind::Auth) {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "handle_auth_response",
            });
        }

        match CommandKind::Auth.decode_reply(line) {
            Ok(Reply::Authenticated(grant)) => {
                self.state = SessionState::Ready;
                self.in_flight = None;
                self.grant = Some(grant.clone());
                Ok(grant)
            },
            Ok(other) => {
                self.teardown();
                Err(SessionError::Protocol(format!("unexpected AUTH reply {other:?}")))
            },
            Err(err) => {
                self.teardown();
                Err(err.into())
            },
        }
    }

    /// Send a `GET`/`SET`/`LIST` request.
    ///
    /// The request is validated first; an invalid request leaves the session
    /// untouched.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidArgument` if a field breaks the framing rules
    /// - `SessionError::InvalidState` if not `Ready`, or for an `AUTH` request
    /// - `SessionError::CommandInFlight` if a reply is still outstanding
    pub fn begin_command(&mut self, request: Request) -> Result<Vec<SessionAction>, SessionError> {
        request.validate().map_err(SessionError::InvalidArgument)?;

        if request.kind() == CommandKind::Auth {
            return Err(SessionError::InvalidState { state: self.state, operation: "send AUTH" });
        }

        self.require(SessionState::Ready, "begin_command")?;
        if let Some(command) = self.in_flight {
            return Err(SessionError::CommandInFlight { command });
        }

        self.in_flight = Some(request.kind());
        Ok(vec![SessionAction::Send(request), SessionAction::ReadLine])
    }

    /// Process a command reply. `None` means end-of-stream.
    ///
    /// A failure line, end-of-stream, or unparseable payload drops the
    /// session.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if no command is awaiting a reply
    /// - `SessionError::Rejected`, `SessionError::ConnectionClosed`, or
    ///   `SessionError::Protocol` per the reply
    pub fn handle_command_response(&mut self, line: Option<&str>) -> Result<Reply, SessionError> {
        let command = match (self.state, self.in_flight) {
            (SessionState::Ready, Some(command)) => command,
            (state, _) => {
                return Err(SessionError::InvalidState {
                    state,
                    operation: "handle_command_response",
                });
            },
        };

        match command.decode_reply(line) {
            Ok(reply) => {
                self.in_flight = None;
                Ok(reply)
            },
            Err(err) => {
                self.teardown();
                Err(err.into())
            },
        }
    }

    /// The transport failed (open, write, or read error).
    ///
    /// Always ends `Disconnected`. Returns `CloseChannel` if a channel was
    /// open.
    pub fn transport_failed(&mut self, reason: impl Into<String>) -> Vec<SessionAction> {
        if self.teardown() {
            vec![SessionAction::CloseChannel { reason: reason.into() }]
        } else {
            vec![]
        }
    }

    /// Close the session. Idempotent.
    pub fn close(&mut self) -> Vec<SessionAction> {
        self.transport_failed("closed by client")
    }

    fn require(&self, expected: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { state: self.state, operation })
        }
    }

    /// Reset to `Disconnected`. Returns whether a channel was open.
    fn teardown(&mut self) -> bool {
        let was_open = self.channel_open;

        self.state = SessionState::Disconnected;
        self.channel_open = false;
        self.in_flight = None;
        self.grant = None;

        was_open
    }
}
