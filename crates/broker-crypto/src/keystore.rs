//! Identity key stores.
//!
//! A key store turns a caller id into a [`CallerIdentity`]: an Ed25519 signing
//! key plus the authority's endorsement of it. Both stores derive everything
//! from one device master seed, so the only secret at rest is 32 bytes.

use std::{
    collections::BTreeSet,
    fmt, fs, io,
    path::{Path, PathBuf},
};

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use crate::{
    derivation::{derive_authority_seed, derive_identity_seed},
    error::AttestationError,
};

/// Name of the hex-encoded device seed inside a key directory.
pub const SEED_FILE: &str = "device.seed";

/// Name of the optional enrollment list inside a key directory.
///
/// One caller id per line; blank lines and `#` comments are ignored. When the
/// file is absent every caller is enrolled.
pub const ENROLLED_FILE: &str = "enrolled";

/// Label prefixed to the endorsement message
const ENDORSEMENT_LABEL: &[u8] = b"dataBrokerEndorseV1";

/// A caller's signing identity and its certificate chain.
pub struct CallerIdentity {
    caller_id: String,
    signing_key: SigningKey,
    endorsement: Signature,
}

impl CallerIdentity {
    /// Caller this identity belongs to.
    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    /// Public half of the identity key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Authority signature over `(caller_id, identity public key)`.
    pub fn endorsement(&self) -> &Signature {
        &self.endorsement
    }

    pub(crate) fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }
}

impl fmt::Debug for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallerIdentity")
            .field("caller_id", &self.caller_id)
            .field("verifying_key", &hex::encode(self.verifying_key().as_bytes()))
            .finish_non_exhaustive()
    }
}

/// Bytes the authority signs to endorse an identity key.
pub(crate) fn endorsement_message(caller_id: &str, public_key: &[u8; 32]) -> Vec<u8> {
    let mut message =
        Vec::with_capacity(ENDORSEMENT_LABEL.len() + 8 + caller_id.len() + public_key.len());
    message.extend_from_slice(ENDORSEMENT_LABEL);
    message.extend_from_slice(&(caller_id.len() as u64).to_be_bytes());
    message.extend_from_slice(caller_id.as_bytes());
    message.extend_from_slice(public_key);
    message
}

/// Source of caller identities.
///
/// Implementations may touch disk or a hardware keystore, so callers should
/// treat [`KeyStore::identity`] as blocking.
pub trait KeyStore: Send + Sync {
    /// Identity and certificate chain for `caller_id`.
    ///
    /// # Errors
    ///
    /// - `AttestationError::KeyStoreUnavailable` if the device seed is missing
    ///   or unreadable
    /// - `AttestationError::NoCertificateChain` if the caller is not enrolled
    /// - `AttestationError::InvalidCallerId` for ids the wire format forbids
    fn identity(&self, caller_id: &str) -> Result<CallerIdentity, AttestationError>;

    /// Public key a broker should trust to verify endorsements.
    fn authority(&self) -> Result<VerifyingKey, AttestationError>;
}

/// Material shared by both store implementations.
struct DeviceKeys {
    master: Zeroizing<[u8; 32]>,
    enrolled: Option<BTreeSet<String>>,
}

impl DeviceKeys {
    fn identity(&self, caller_id: &str) -> Result<CallerIdentity, AttestationError> {
        if caller_id.is_empty() || caller_id.chars().any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(AttestationError::InvalidCallerId(caller_id.to_string()));
        }

        if let Some(enrolled) = &self.enrolled
            && !enrolled.contains(caller_id)
        {
            return Err(AttestationError::NoCertificateChain { caller_id: caller_id.to_string() });
        }

        let identity_seed = derive_identity_seed(self.master.as_slice(), caller_id);
        let signing_key = SigningKey::from_bytes(&identity_seed);
        let authority = SigningKey::from_bytes(&derive_authority_seed(self.master.as_slice()));
        let endorsement =
            authority.sign(&endorsement_message(caller_id, signing_key.verifying_key().as_bytes()));

        Ok(CallerIdentity { caller_id: caller_id.to_string(), signing_key, endorsement })
    }

    fn authority(&self) -> VerifyingKey {
        SigningKey::from_bytes(&derive_authority_seed(self.master.as_slice())).verifying_key()
    }
}

/// In-process key store holding the device seed in memory.
pub struct MemoryKeyStore {
    keys: DeviceKeys,
}

impl MemoryKeyStore {
    /// Store with open enrollment (every caller has a chain).
    pub fn new(master_seed: [u8; 32]) -> Self {
        Self { keys: DeviceKeys { master: Zeroizing::new(master_seed), enrolled: None } }
    }

    /// Restrict the store to the given callers.
    #[must_use]
    pub fn with_enrolled<I, S>(mut self, callers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.enrolled = Some(callers.into_iter().map(Into::into).collect());
        self
    }
}

impl KeyStore for MemoryKeyStore {
    fn identity(&self, caller_id: &str) -> Result<CallerIdentity, AttestationError> {
        self.keys.identity(caller_id)
    }

    fn authority(&self) -> Result<VerifyingKey, AttestationError> {
        Ok(self.keys.authority())
    }
}

/// Key store backed by a key directory on disk.
///
/// The directory is read on every request, so a store opened before the
/// seed is provisioned starts working once it appears, and a removed seed
/// surfaces as `KeyStoreUnavailable` instead of a stale key.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Open a key directory. Nothing is read until a key is requested.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write a device seed into `dir` (creating it) and open the store.
    ///
    /// The seed file is created with mode `0600`.
    pub fn provision(dir: impl Into<PathBuf>, master_seed: &[u8; 32]) -> io::Result<Self> {
        use std::{io::Write, os::unix::fs::OpenOptionsExt};

        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let encoded = Zeroizing::new(hex::encode(master_seed));
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(dir.join(SEED_FILE))?;
        file.write_all(encoded.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Self { dir })
    }

    /// Key directory path.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn load(&self) -> Result<DeviceKeys, AttestationError> {
        let seed_path = self.dir.join(SEED_FILE);
        let encoded = fs::read_to_string(&seed_path).map(Zeroizing::new).map_err(|e| {
            AttestationError::KeyStoreUnavailable(format!("{}: {e}", seed_path.display()))
        })?;

        let mut master = Zeroizing::new([0u8; 32]);
        hex::decode_to_slice(encoded.trim(), &mut master[..]).map_err(|e| {
            AttestationError::KeyStoreUnavailable(format!("{}: {e}", seed_path.display()))
        })?;

        let enrolled_path = self.dir.join(ENROLLED_FILE);
        let enrolled = match fs::read_to_string(&enrolled_path) {
            Ok(contents) => Some(
                contents
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty() && !line.starts_with('#'))
                    .map(str::to_string)
                    .collect(),
            ),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(AttestationError::KeyStoreUnavailable(format!(
                    "{}: {e}",
                    enrolled_path.display()
                )));
            },
        };

        Ok(DeviceKeys { master, enrolled })
    }
}

impl KeyStore for FileKeyStore {
    fn identity(&self, caller_id: &str) -> Result<CallerIdentity, AttestationError> {
        self.load()?.identity(caller_id)
    }

    fn authority(&self) -> Result<VerifyingKey, AttestationError> {
        Ok(self.load()?.authority())
    }
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::Verifier;

    use super::*;

    const SEED: [u8; 32] = [7u8; 32];

    #[test]
    fn identity_is_endorsed_by_authority() {
        let store = MemoryKeyStore::new(SEED);
        let identity = store.identity("com.example.dbapp").unwrap();
        let authority = store.authority().unwrap();

        let message =
            endorsement_message("com.example.dbapp", identity.verifying_key().as_bytes());
        assert!(authority.verify(&message, identity.endorsement()).is_ok());
    }

    #[test]
    fn endorsement_is_bound_to_caller() {
        let store = MemoryKeyStore::new(SEED);
        let identity = store.identity("com.example.a").unwrap();
        let authority = store.authority().unwrap();

        let forged = endorsement_message("com.example.b", identity.verifying_key().as_bytes());
        assert!(authority.verify(&forged, identity.endorsement()).is_err());
    }

    #[test]
    fn unenrolled_caller_has_no_chain() {
        let store = MemoryKeyStore::new(SEED).with_enrolled(["com.example.dbapp"]);

        assert!(store.identity("com.example.dbapp").is_ok());
        assert_eq!(
            store.identity("com.evil.app").unwrap_err(),
            AttestationError::NoCertificateChain { caller_id: "com.evil.app".into() }
        );
    }

    #[test]
    fn rejects_unframeable_caller_id() {
        let store = MemoryKeyStore::new(SEED);

        assert!(matches!(store.identity(""), Err(AttestationError::InvalidCallerId(_))));
        assert!(matches!(store.identity("a b"), Err(AttestationError::InvalidCallerId(_))));
    }

    #[test]
    fn file_store_matches_memory_store() {
        let dir = tempfile::tempdir().unwrap();
        let file_store = FileKeyStore::provision(dir.path().join("keys"), &SEED).unwrap();
        let memory_store = MemoryKeyStore::new(SEED);

        let from_file = file_store.identity("app").unwrap();
        let from_memory = memory_store.identity("app").unwrap();

        assert_eq!(from_file.verifying_key(), from_memory.verifying_key());
        assert_eq!(file_store.authority().unwrap(), memory_store.authority().unwrap());
    }

    #[test]
    fn file_store_without_seed_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::open(dir.path());

        assert!(matches!(store.identity("app"), Err(AttestationError::KeyStoreUnavailable(_))));
    }

    #[test]
    fn file_store_with_corrupt_seed_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SEED_FILE), "not hex at all").unwrap();
        let store = FileKeyStore::open(dir.path());

        assert!(matches!(store.identity("app"), Err(AttestationError::KeyStoreUnavailable(_))));
    }

    #[test]
    fn file_store_honors_enrollment_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::provision(dir.path(), &SEED).unwrap();
        fs::write(dir.path().join(ENROLLED_FILE), "# allowed apps\ncom.example.dbapp\n\n").unwrap();

        assert!(store.identity("com.example.dbapp").is_ok());
        assert!(matches!(
            store.identity("com.other"),
            Err(AttestationError::NoCertificateChain { .. })
        ));
    }

    #[test]
    fn debug_does_not_print_secret() {
        let store = MemoryKeyStore::new(SEED);
        let identity = store.identity("app").unwrap();
        let rendered = format!("{identity:?}");

        assert!(rendered.contains("verifying_key"));
        assert!(!rendered.contains("signing_key"));
    }
}
