//! Token provider.
//!
//! Produces a fresh attestation token for every connection attempt. Tokens
//! are never cached: each one carries a new nonce and validity window.

use std::{sync::Arc, time::Duration};

use broker_crypto::{AttestationError, AttestationToken, KeyStore, NONCE_SIZE, issue_token};

use crate::env::Environment;

/// Default token lifetime.
pub const DEFAULT_TOKEN_VALIDITY: Duration = Duration::from_secs(5 * 60);

/// Token provider configuration
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// How long an issued token stays valid
    pub validity: Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { validity: DEFAULT_TOKEN_VALIDITY }
    }
}

/// Source of attestation tokens for the `AUTH` handshake.
///
/// Implementations may sign with a key store and must not block
/// indefinitely. Errors are fatal to the current connection attempt; the
/// provider never retries internally.
pub trait TokenProvider: Send + Sync + 'static {
    /// Generate a token bound to `caller_id`.
    fn generate_token(&self, caller_id: &str) -> Result<AttestationToken, AttestationError>;
}

impl<T: TokenProvider> TokenProvider for Arc<T> {
    fn generate_token(&self, caller_id: &str) -> Result<AttestationToken, AttestationError> {
        (**self).generate_token(caller_id)
    }
}

/// Token provider backed by a [`KeyStore`].
///
/// Takes issue time and nonce from the [`Environment`], so a seeded
/// environment produces reproducible tokens.
pub struct KeystoreTokenProvider<E, K> {
    env: E,
    keys: K,
    config: TokenConfig,
}

impl<E, K> KeystoreTokenProvider<E, K>
where
    E: Environment,
    K: KeyStore,
{
    /// Create a provider with the default validity.
    pub fn new(env: E, keys: K) -> Self {
        Self::with_config(env, keys, TokenConfig::default())
    }

    /// Create a provider with explicit configuration.
    pub fn with_config(env: E, keys: K, config: TokenConfig) -> Self {
        Self { env, keys, config }
    }

    /// Underlying key store.
    pub fn key_store(&self) -> &K {
        &self.keys
    }
}

impl<E, K> TokenProvider for KeystoreTokenProvider<E, K>
where
    E: Environment,
    K: KeyStore + 'static,
{
    fn generate_token(&self, caller_id: &str) -> Result<AttestationToken, AttestationError> {
        let identity = self.keys.identity(caller_id)?;

        let mut nonce = [0u8; NONCE_SIZE];
        self.env.random_bytes(&mut nonce);

        issue_token(&identity, self.env.wall_clock_secs(), self.config.validity.as_secs(), nonce)
    }
}
