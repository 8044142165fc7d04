//! Token verification (broker side).

use std::collections::HashMap;

use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use crate::{
    error::VerifyError,
    keystore::endorsement_message,
    token::{NONCE_SIZE, SignedToken, TOKEN_VERSION, TokenClaims},
};

/// Default tolerated clock difference between issuer and verifier.
pub const DEFAULT_MAX_SKEW_SECS: u64 = 30;

/// A token that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Decoded claims
    pub claims: TokenClaims,
    /// Endorsed identity key that signed the claims
    pub identity_key: VerifyingKey,
}

/// Verifies attestation tokens against a trusted authority key.
///
/// Stateful only for replay protection: accepted nonces are remembered until
/// their token expires.
#[derive(Debug)]
pub struct TokenVerifier {
    authority: VerifyingKey,
    max_skew_secs: u64,
    /// nonce -> expires_at
    seen: HashMap<[u8; NONCE_SIZE], u64>,
}

impl TokenVerifier {
    /// Verifier trusting `authority` with the default skew.
    pub fn new(authority: VerifyingKey) -> Self {
        Self { authority, max_skew_secs: DEFAULT_MAX_SKEW_SECS, seen: HashMap::new() }
    }

    /// Override the tolerated clock skew.
    #[must_use]
    pub fn with_max_skew(mut self, secs: u64) -> Self {
        self.max_skew_secs = secs;
        self
    }

    /// Number of nonces currently remembered.
    pub fn remembered_nonces(&self) -> usize {
        self.seen.len()
    }

    /// Verify `token` presented by `presented_caller` at time `now`.
    ///
    /// Checks, in order: encoding, version, endorsement, signature, caller
    /// binding, validity window, replay. On success the nonce is remembered.
    pub fn verify(
        &mut self,
        token: &str,
        presented_caller: &str,
        now: u64,
    ) -> Result<VerifiedToken, VerifyError> {
        let bytes = hex::decode(token).map_err(|e| VerifyError::Malformed(e.to_string()))?;
        let envelope: SignedToken = ciborium::from_reader(bytes.as_slice())
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;
        let claims: TokenClaims = ciborium::from_reader(envelope.claims.as_slice())
            .map_err(|e| VerifyError::Malformed(e.to_string()))?;

        if claims.version != TOKEN_VERSION {
            return Err(VerifyError::UnsupportedVersion(claims.version));
        }

        let identity_key = VerifyingKey::from_bytes(&envelope.public_key)
            .map_err(|e| VerifyError::Malformed(format!("identity key: {e}")))?;
        let endorsement = Signature::from_slice(&envelope.endorsement)
            .map_err(|e| VerifyError::Malformed(format!("endorsement: {e}")))?;
        let signature = Signature::from_slice(&envelope.signature)
            .map_err(|e| VerifyError::Malformed(format!("signature: {e}")))?;

        let endorsed = endorsement_message(&claims.caller_id, &envelope.public_key);
        if self.authority.verify(&endorsed, &endorsement).is_err() {
            return Err(VerifyError::BadEndorsement);
        }

        if identity_key.verify(&envelope.claims, &signature).is_err() {
            return Err(VerifyError::BadSignature);
        }

        if claims.caller_id != presented_caller {
            return Err(VerifyError::CallerMismatch {
                token_caller: claims.caller_id,
                presented: presented_caller.to_string(),
            });
        }

        if now.saturating_add(self.max_skew_secs) < claims.issued_at {
            return Err(VerifyError::NotYetValid { issued_at: claims.issued_at, now });
        }

        if now > claims.expires_at.saturating_add(self.max_skew_secs) {
            return Err(VerifyError::Expired { expires_at: claims.expires_at, now });
        }

        let horizon = now.saturating_sub(self.max_skew_secs);
        self.seen.retain(|_, expires_at| *expires_at >= horizon);

        if self.seen.contains_key(&claims.nonce) {
            return Err(VerifyError::Replayed);
        }
        self.seen.insert(claims.nonce, claims.expires_at);

        Ok(VerifiedToken { claims, identity_key })
    }
}
