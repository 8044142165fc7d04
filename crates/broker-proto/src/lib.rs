//! Data Broker wire protocol.
//!
//! Line-oriented request/response codec. Every request is exactly one
//! `\n`-terminated line of space-separated fields, and every response is one
//! line starting with `OK:` (success) or anything else (failure).
//!
//! ```text
//! AUTH <caller_id> <token>   ->  OK:[layers=attestation[,permission]]
//! GET <key>                  ->  OK:<value> | OK:
//! SET <key> <value>          ->  OK:
//! LIST                       ->  OK:<k>=<v>,<k>=<v>,...
//! ```
//!
//! The codec is pure: no I/O, no allocation beyond the produced lines. Callers
//! build a [`Request`] through its validating constructors, encode it, write
//! the bytes, and feed the reply line (or end-of-stream) to
//! [`CommandKind::decode_reply`].
//!
//! # Invariants
//!
//! - Injection Safety: a successfully constructed or encoded [`Request`] always
//!   produces exactly one line. Keys never contain whitespace or separators and
//!   values never contain line terminators or the LIST pair separator.
//! - Atomic Encoding: [`Request::encode`] validates every field before writing
//!   a single byte, so a rejected request leaves the destination untouched.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
mod request;
mod response;
mod validate;

pub use errors::{CodecError, Result};
pub use request::{CommandKind, Request};
pub use response::{AuthGrant, AuthLayers, Entries, Reply, Response, format_entries, parse_entries};
pub use validate::{validate_caller_id, validate_key, validate_token, validate_value};

/// Prefix marking an affirmative response line.
pub const OK_PREFIX: &str = "OK:";

/// Separator between key/value pairs in a LIST payload.
pub const PAIR_SEPARATOR: char = ',';

/// Separator between a key and its value inside one LIST pair.
pub const KV_SEPARATOR: char = '=';

/// Frame terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Maximum encoded line length in bytes, terminator included.
///
/// Applies to requests at encode time and to responses at read time.
pub const MAX_LINE_LEN: usize = 64 * 1024;
