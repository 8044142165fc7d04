//! Attestation errors.

use thiserror::Error;

/// Errors raised while producing a token.
///
/// All of them are fatal to the connection attempt that requested the token.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttestationError {
    /// The key store could not be read or holds no usable device seed.
    #[error("key store unavailable: {0}")]
    KeyStoreUnavailable(String),

    /// The key store has no certificate chain (endorsement) for this caller.
    #[error("no certificate chain for caller {caller_id:?}")]
    NoCertificateChain {
        /// Caller the token was requested for
        caller_id: String,
    },

    /// Caller id is empty or contains characters the wire format forbids.
    #[error("invalid caller id {0:?}")]
    InvalidCallerId(String),

    /// Claims could not be serialized.
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

/// Errors raised while verifying a token (broker side).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    /// Token is not valid hex/CBOR or is missing fields.
    #[error("malformed token: {0}")]
    Malformed(String),

    /// Token version is not understood.
    #[error("unsupported token version {0}")]
    UnsupportedVersion(u8),

    /// The identity key was not endorsed by the trusted authority.
    #[error("endorsement does not verify against the trusted authority")]
    BadEndorsement,

    /// The claims signature does not verify against the identity key.
    #[error("token signature verification failed")]
    BadSignature,

    /// Token was issued for a different caller than the one authenticating.
    #[error("token bound to {token_caller:?}, presented by {presented:?}")]
    CallerMismatch {
        /// Caller id inside the token
        token_caller: String,
        /// Caller id from the AUTH line
        presented: String,
    },

    /// Token validity window has ended.
    #[error("token expired at {expires_at}, now {now}")]
    Expired {
        /// Expiry (unix seconds)
        expires_at: u64,
        /// Verification time (unix seconds)
        now: u64,
    },

    /// Token was issued in the future beyond the allowed skew.
    #[error("token not valid before {issued_at}, now {now}")]
    NotYetValid {
        /// Issue time (unix seconds)
        issued_at: u64,
        /// Verification time (unix seconds)
        now: u64,
    },

    /// A token with this nonce was already accepted.
    #[error("token nonce already used")]
    Replayed,
}
