//! AES-256-GCM envelope shared by message encryption and the contact store.
//!
//! Canonical text form: `base64(nonce[12] ‖ ciphertext ‖ tag[16])`, no
//! delimiter. The nonce length is fixed, so parsing is unambiguous.
//!
//! Every seal draws a fresh random 96-bit nonce from the OS RNG. Reusing a
//! nonce under the same key breaks AES-GCM completely, so there is no API
//! that accepts a caller-chosen nonce for encryption.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::CryptoError;

/// AES-GCM nonce size (96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (128 bits).
pub const TAG_SIZE: usize = 16;

/// AES-256 key size.
pub const KEY_SIZE: usize = 32;

/// A sealed payload: nonce plus ciphertext with the tag appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext followed by the 16-byte tag.
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Encrypt `plaintext` under `key` with a fresh random nonce.
    pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Self, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid AES key: {e}")))?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        // Encryption only fails for plaintexts beyond the GCM length limit.
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encryption("plaintext too large for AES-GCM".into()))?;

        Ok(Self { nonce, ciphertext })
    }

    /// Decrypt and verify. A tag mismatch is always `Authentication`.
    pub fn open(&self, key: &[u8; KEY_SIZE]) -> Result<Vec<u8>, CryptoError> {
        if self.ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "ciphertext shorter than the {TAG_SIZE}-byte tag"
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid AES key: {e}")))?;
        cipher
            .decrypt(Nonce::from_slice(&self.nonce), self.ciphertext.as_slice())
            .map_err(|_| CryptoError::Authentication)
    }

    /// `nonce ‖ ciphertext ‖ tag` as raw bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Split raw bytes into nonce and ciphertext.
    pub fn from_bytes(raw: &[u8]) -> Result<Self, CryptoError> {
        if raw.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "payload too short: {} bytes, need at least {}",
                raw.len(),
                NONCE_SIZE + TAG_SIZE
            )));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            ciphertext: ciphertext.to_vec(),
        })
    }

    /// Canonical text form.
    pub fn encode(&self) -> String {
        BASE64.encode(self.to_bytes())
    }

    /// Parse the canonical text form. Surrounding whitespace is ignored.
    pub fn decode(text: &str) -> Result<Self, CryptoError> {
        let raw = BASE64
            .decode(text.trim())
            .map_err(|e| CryptoError::Decryption(format!("invalid base64: {e}")))?;
        Self::from_bytes(&raw)
    }

    /// Parse the older `base64(nonce):base64(ciphertext‖tag)` form.
    ///
    /// Only contact-store blobs were ever written this way.
    pub fn decode_delimited(text: &str) -> Result<Self, CryptoError> {
        let (nonce_b64, ct_b64) = text
            .trim()
            .split_once(':')
            .ok_or_else(|| CryptoError::Decryption("missing ':' separator".into()))?;
        let nonce_bytes = BASE64
            .decode(nonce_b64)
            .map_err(|e| CryptoError::Decryption(format!("invalid nonce base64: {e}")))?;
        let nonce: [u8; NONCE_SIZE] = nonce_bytes.as_slice().try_into().map_err(|_| {
            CryptoError::Decryption(format!(
                "nonce must be {NONCE_SIZE} bytes, got {}",
                nonce_bytes.len()
            ))
        })?;
        let ciphertext = BASE64
            .decode(ct_b64)
            .map_err(|e| CryptoError::Decryption(format!("invalid ciphertext base64: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::Decryption(format!(
                "ciphertext shorter than the {TAG_SIZE}-byte tag"
            )));
        }
        Ok(Self { nonce, ciphertext })
    }

    /// Encode in the older delimited form.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn encode_delimited(&self) -> String {
        format!(
            "{}:{}",
            BASE64.encode(self.nonce),
            BASE64.encode(&self.ciphertext)
        )
    }
}
