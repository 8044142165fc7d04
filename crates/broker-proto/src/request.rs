//! Requests sent by the client.

use std::fmt;

use bytes::BufMut;

use crate::{
    LINE_TERMINATOR, MAX_LINE_LEN,
    errors::{CodecError, Result},
    validate::{validate_caller_id, validate_key, validate_token, validate_value},
};

/// Command verb, used to pick the reply shape and to label errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// `AUTH <caller_id> <token>`
    Auth,
    /// `GET <key>`
    Get,
    /// `SET <key> <value>`
    Set,
    /// `LIST`
    List,
}

impl CommandKind {
    /// Wire verb.
    pub fn verb(self) -> &'static str {
        match self {
            Self::Auth => "AUTH",
            Self::Get => "GET",
            Self::Set => "SET",
            Self::List => "LIST",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// A single protocol request.
///
/// Construct through [`Request::auth`], [`Request::get`], [`Request::set`], or
/// [`Request::List`]. The constructors validate every caller-supplied field,
/// and [`Request::encode`] validates again so a hand-built variant can never
/// reach the wire unchecked.
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    /// Authenticate the session.
    Auth {
        /// Application identity the token is bound to
        caller_id: String,
        /// Attestation token (opaque, whitespace-free)
        token: String,
    },
    /// Read one key.
    Get {
        /// Key to read
        key: String,
    },
    /// Write one key.
    Set {
        /// Key to write
        key: String,
        /// Value to store (last field, may contain spaces)
        value: String,
    },
    /// Enumerate all entries.
    List,
}

impl Request {
    /// Build an `AUTH` request.
    pub fn auth(caller_id: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let request = Self::Auth { caller_id: caller_id.into(), token: token.into() };
        request.validate()?;
        Ok(request)
    }

    /// Build a `GET` request.
    pub fn get(key: impl Into<String>) -> Result<Self> {
        let request = Self::Get { key: key.into() };
        request.validate()?;
        Ok(request)
    }

    /// Build a `SET` request.
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let request = Self::Set { key: key.into(), value: value.into() };
        request.validate()?;
        Ok(request)
    }

    /// Command verb of this request.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Auth { .. } => CommandKind::Auth,
            Self::Get { .. } => CommandKind::Get,
            Self::Set { .. } => CommandKind::Set,
            Self::List => CommandKind::List,
        }
    }

    /// Check every field against the framing rules.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Auth { caller_id, token } => {
                validate_caller_id(caller_id)?;
                validate_token(token)
            },
            Self::Get { key } => validate_key(key),
            Self::Set { key, value } => {
                validate_key(key)?;
                validate_value(value)
            },
            Self::List => Ok(()),
        }
    }

    /// Render the request line without its terminator.
    pub fn to_line(&self) -> Result<String> {
        self.validate()?;

        let line = match self {
            Self::Auth { caller_id, token } => format!("AUTH {caller_id} {token}"),
            Self::Get { key } => format!("GET {key}"),
            Self::Set { key, value } => format!("SET {key} {value}"),
            Self::List => "LIST".to_string(),
        };

        if line.len() + 1 > MAX_LINE_LEN {
            return Err(CodecError::invalid(
                "request",
                format!("encoded line is {} bytes, limit is {MAX_LINE_LEN}", line.len() + 1),
            ));
        }

        Ok(line)
    }

    /// Encode the request as one terminated line.
    ///
    /// # Errors
    ///
    /// - `CodecError::InvalidArgument` if any field breaks the framing rules or
    ///   the line exceeds [`MAX_LINE_LEN`]. Nothing is written to `dst` in
    ///   that case.
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let line = self.to_line()?;

        dst.put_slice(line.as_bytes());
        dst.put_u8(LINE_TERMINATOR);

        Ok(())
    }

    /// Parse a request line (broker side). A trailing `\r` is ignored.
    ///
    /// # Errors
    ///
    /// - `CodecError::MalformedRequest` for unknown verbs or missing fields
    /// - `CodecError::InvalidArgument` if a parsed field breaks the framing
    ///   rules
    pub fn decode(line: &str) -> Result<Self> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let (verb, rest) = match line.split_once(' ') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (line, None),
        };

        let request = match (verb, rest) {
            ("AUTH", Some(rest)) => {
                let (caller_id, token) = rest
                    .split_once(' ')
                    .ok_or_else(|| CodecError::MalformedRequest("AUTH requires a token".into()))?;
                Self::Auth { caller_id: caller_id.to_string(), token: token.to_string() }
            },
            ("GET", Some(key)) => Self::Get { key: key.to_string() },
            ("SET", Some(rest)) => {
                let (key, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| CodecError::MalformedRequest("SET requires a value".into()))?;
                Self::Set { key: key.to_string(), value: value.to_string() }
            },
            ("LIST", None) => Self::List,
            ("AUTH" | "GET" | "SET", None) => {
                return Err(CodecError::MalformedRequest(format!("{verb} requires arguments")));
            },
            ("LIST", Some(_)) => {
                return Err(CodecError::MalformedRequest("LIST takes no arguments".into()));
            },
            (other, _) => {
                return Err(CodecError::MalformedRequest(format!("unknown command {other:?}")));
            },
        };

        request.validate()?;
        Ok(request)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth { caller_id, token } => f
                .debug_struct("Auth")
                .field("caller_id", caller_id)
                .field("token_len", &token.len())
                .finish(),
            Self::Get { key } => f.debug_struct("Get").field("key", key).finish(),
            Self::Set { key, value } => {
                f.debug_struct("Set").field("key", key).field("value_len", &value.len()).finish()
            },
            Self::List => f.write_str("List"),
        }
    }
}
