//! Session key derivation.
//!
//! Expands a raw ECDH shared secret into a 256-bit AES key with
//! HKDF-SHA256 (RFC 5869). No salt is used: the shared secret already has
//! full entropy, and adding one would change every derived key. The `info`
//! string binds the key to this protocol so the same secret cannot be
//! reused verbatim for another purpose.
//!
//! Derivation is deterministic. Session keys are never persisted, so this
//! is what lets the contact store rebuild them on every load.

use hkdf::Hkdf;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// HKDF info string for message session keys.
pub const DEFAULT_INFO: &str = "e2ee-chat-v1";

/// Session key length in bytes (AES-256).
pub const SESSION_KEY_LEN: usize = 32;

/// A 256-bit symmetric session key. Held in RAM only, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for SessionKey {}

impl SessionKey {
    pub const fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Build a key from a slice, rejecting anything that is not 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let arr: [u8; SESSION_KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::KeyDerivation(format!(
                "session key must be {SESSION_KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Raw key bytes. Handle with care.
    pub const fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    /// Generate a random key. Only useful for tests and local experiments.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; SESSION_KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

/// Derive the session key for a contact from the raw ECDH secret.
pub fn derive_session_key(shared_secret: &[u8]) -> Result<SessionKey, CryptoError> {
    derive_session_key_with_info(shared_secret, DEFAULT_INFO)
}

/// Derive a 32-byte key with HKDF-SHA256, no salt, and the given `info`.
pub fn derive_session_key_with_info(
    shared_secret: &[u8],
    info: &str,
) -> Result<SessionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; SESSION_KEY_LEN];
    hk.expand(info.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    let session = SessionKey(key);
    key.zeroize();
    Ok(session)
}
