//! Message encryption under a contact's session key.
//!
//! Wire format: `base64(nonce[12] ‖ ciphertext ‖ tag[16])`. The same session
//! key is used for every message with a contact, so each call draws a fresh
//! random nonce.

use crate::envelope::Envelope;
use crate::error::CryptoError;
use crate::kdf::SessionKey;

/// An encrypted message before text encoding.
pub type CipherMessage = Envelope;

/// Encrypt UTF-8 text into a [`CipherMessage`].
pub fn encrypt_message(plaintext: &str, key: &SessionKey) -> Result<CipherMessage, CryptoError> {
    Envelope::seal(key.as_bytes(), plaintext.as_bytes())
}

/// Decrypt a [`CipherMessage`] back into text.
pub fn decrypt_message(message: &CipherMessage, key: &SessionKey) -> Result<String, CryptoError> {
    let plaintext = message.open(key.as_bytes())?;
    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::Decryption("plaintext is not valid UTF-8".into()))
}

/// Encrypt text into the message wire format.
pub fn encrypt(plaintext: &str, key: &SessionKey) -> Result<String, CryptoError> {
    Ok(encrypt_message(plaintext, key)?.encode())
}

/// Decrypt wire-format text.
///
/// Malformed input (bad base64, shorter than nonce plus tag) is a
/// `Decryption` error; a tag mismatch is `Authentication`.
pub fn decrypt(ciphertext: &str, key: &SessionKey) -> Result<String, CryptoError> {
    decrypt_message(&Envelope::decode(ciphertext)?, key)
}
