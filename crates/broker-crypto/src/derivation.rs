//! Key derivation using HKDF

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

/// Label used for caller identity derivation
const IDENTITY_LABEL: &[u8] = b"dataBrokerAttestV1";

/// Label used for the device authority derivation
const AUTHORITY_LABEL: &[u8] = b"dataBrokerAuthorityV1";

/// Derive the Ed25519 seed of a caller's identity key.
///
/// # Security
///
/// - Different callers produce different seeds (caller isolation)
/// - Deterministic: the same device and caller always get the same key, so a
///   broker can pin it
pub fn derive_identity_seed(master_seed: &[u8], caller_id: &str) -> Zeroizing<[u8; 32]> {
    let mut info = Vec::with_capacity(IDENTITY_LABEL.len() + caller_id.len());
    info.extend_from_slice(IDENTITY_LABEL);
    info.extend_from_slice(caller_id.as_bytes());

    expand(master_seed, &info)
}

/// Derive the Ed25519 seed of the device authority key.
pub fn derive_authority_seed(master_seed: &[u8]) -> Zeroizing<[u8; 32]> {
    expand(master_seed, AUTHORITY_LABEL)
}

fn expand(master_seed: &[u8], info: &[u8]) -> Zeroizing<[u8; 32]> {
    let hkdf = Hkdf::<Sha256>::new(None, master_seed);

    let mut seed = Zeroizing::new([0u8; 32]);
    let Ok(()) = hkdf.expand(info, &mut seed[..]) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };

    seed
}
