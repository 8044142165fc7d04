//! Data Broker session core.
//!
//! Pure protocol logic for one broker session. Nothing here performs I/O:
//! methods take inputs (a token, a response line, a transport failure) and
//! return [`SessionAction`]s for the driver to execute. The async driver lives
//! in `broker-client`; tests drive the state machine directly.
//!
//! # Components
//!
//! - [`Session`]: connection/authentication state machine
//! - [`TokenProvider`]: attestation token source consumed by the handshake
//! - [`Environment`]: time and randomness, swapped for a seeded one in tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
mod error;
mod session;
mod token;

pub use env::Environment;
pub use error::SessionError;
pub use session::{Session, SessionAction, SessionState};
pub use token::{DEFAULT_TOKEN_VALIDITY, KeystoreTokenProvider, TokenConfig, TokenProvider};
