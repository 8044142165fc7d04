//! Token issuance.
//!
//! All functions are pure: the issue time and nonce come from the caller.

use std::fmt;

use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};

use crate::{error::AttestationError, keystore::CallerIdentity};

/// Current token format version.
pub const TOKEN_VERSION: u8 = 1;

/// Size of the per-token random nonce in bytes.
pub const NONCE_SIZE: usize = 16;

/// Statements the identity key signs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Token format version
    pub version: u8,
    /// Caller the token is bound to
    pub caller_id: String,
    /// Issue time (unix seconds)
    pub issued_at: u64,
    /// End of validity window (unix seconds)
    pub expires_at: u64,
    /// Random nonce, unique per token
    pub nonce: [u8; NONCE_SIZE],
}

/// Wire envelope. `claims` holds the exact CBOR bytes that were signed.
#[derive(Serialize, Deserialize)]
pub(crate) struct SignedToken {
    pub(crate) claims: Vec<u8>,
    pub(crate) public_key: [u8; 32],
    pub(crate) endorsement: Vec<u8>,
    pub(crate) signature: Vec<u8>,
}

/// An encoded attestation token.
///
/// Lowercase hex, so it never contains whitespace. `Debug` prints only the
/// length.
#[derive(Clone, PartialEq, Eq)]
pub struct AttestationToken(String);

impl AttestationToken {
    /// Token text as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the token into its wire text.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Length of the wire text in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the token is empty (never true for issued tokens).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AttestationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttestationToken").field("len", &self.0.len()).finish()
    }
}

/// Issue a token for `identity`, valid from `issued_at` for `validity_secs`.
///
/// # Security
///
/// - Caller MUST provide a fresh cryptographically secure nonce per token in
///   production; the broker rejects reused nonces
/// - The signature covers the exact CBOR claim bytes carried in the token
pub fn issue_token(
    identity: &CallerIdentity,
    issued_at: u64,
    validity_secs: u64,
    nonce: [u8; NONCE_SIZE],
) -> Result<AttestationToken, AttestationError> {
    let claims = TokenClaims {
        version: TOKEN_VERSION,
        caller_id: identity.caller_id().to_string(),
        issued_at,
        expires_at: issued_at.saturating_add(validity_secs),
        nonce,
    };

    let mut claim_bytes = Vec::new();
    ciborium::into_writer(&claims, &mut claim_bytes)
        .map_err(|e| AttestationError::Encoding(e.to_string()))?;

    let signature: Signature = identity.sign(&claim_bytes);

    let envelope = SignedToken {
        claims: claim_bytes,
        public_key: identity.verifying_key().to_bytes(),
        endorsement: identity.endorsement().to_bytes().to_vec(),
        signature: signature.to_bytes().to_vec(),
    };

    let mut envelope_bytes = Vec::new();
    ciborium::into_writer(&envelope, &mut envelope_bytes)
        .map_err(|e| AttestationError::Encoding(e.to_string()))?;

    Ok(AttestationToken(hex::encode(envelope_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyStore, MemoryKeyStore};

    #[test]
    fn token_is_whitespace_free_hex() {
        let identity = MemoryKeyStore::new([1u8; 32]).identity("com.example.dbapp").unwrap();
        let token = issue_token(&identity, 1_700_000_000, 300, [9u8; NONCE_SIZE]).unwrap();

        assert!(!token.is_empty());
        assert!(token.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn same_inputs_produce_same_token() {
        let identity = MemoryKeyStore::new([1u8; 32]).identity("app").unwrap();

        let a = issue_token(&identity, 100, 300, [3u8; NONCE_SIZE]).unwrap();
        let b = issue_token(&identity, 100, 300, [3u8; NONCE_SIZE]).unwrap();

        assert_eq!(a, b, "Ed25519 signing is deterministic");
    }

    #[test]
    fn different_nonces_produce_different_tokens() {
        let identity = MemoryKeyStore::new([1u8; 32]).identity("app").unwrap();

        let a = issue_token(&identity, 100, 300, [3u8; NONCE_SIZE]).unwrap();
        let b = issue_token(&identity, 100, 300, [4u8; NONCE_SIZE]).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn expiry_saturates() {
        let identity = MemoryKeyStore::new([1u8; 32]).identity("app").unwrap();
        assert!(issue_token(&identity, u64::MAX - 1, 300, [0u8; NONCE_SIZE]).is_ok());
    }

    #[test]
    fn debug_hides_token_text() {
        let identity = MemoryKeyStore::new([1u8; 32]).identity("app").unwrap();
        let token = issue_token(&identity, 100, 300, [3u8; NONCE_SIZE]).unwrap();

        assert!(!format!("{token:?}").contains(token.as_str()));
    }
}
