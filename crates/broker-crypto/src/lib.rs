//! Data Broker attestation primitives.
//!
//! Pure building blocks for layer-1 authentication: deriving a per-caller
//! identity key, issuing a signed token, and verifying it on the broker side.
//! Time and randomness are parameters so callers control them in tests.
//!
//! # Key Hierarchy
//!
//! ```text
//! Device Master Seed
//!        │
//!        ├──► HKDF("dataBrokerAuthorityV1")          → Authority Key
//!        │
//!        └──► HKDF("dataBrokerAttestV1" ‖ caller_id) → Caller Identity Key
//!                                                          │
//! Authority Key ── signs (caller_id, identity pubkey) ──► Endorsement
//!                                                          │
//! Identity Key ── signs CBOR(claims) ────────────────────► Token
//! ```
//!
//! The endorsement plays the role of a certificate chain: a broker that trusts
//! the authority key accepts any identity key the authority endorsed for that
//! caller.
//!
//! # Security
//!
//! - Seeds are held in `Zeroizing` buffers and wiped on drop.
//! - Tokens are bound to one caller id, a validity window, and a random nonce;
//!   the verifier rejects replays of a nonce it has already accepted.
//! - A token never contains whitespace (lowercase hex), so it is safe as the
//!   last field of an `AUTH` line.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod derivation;
mod error;
mod keystore;
mod token;
mod verifier;

pub use derivation::{derive_authority_seed, derive_identity_seed};
pub use ed25519_dalek::VerifyingKey;
pub use error::{AttestationError, VerifyError};
pub use keystore::{
    CallerIdentity, ENROLLED_FILE, FileKeyStore, KeyStore, MemoryKeyStore, SEED_FILE,
};
pub use token::{AttestationToken, NONCE_SIZE, TOKEN_VERSION, TokenClaims, issue_token};
pub use verifier::{DEFAULT_MAX_SKEW_SECS, TokenVerifier, VerifiedToken};
