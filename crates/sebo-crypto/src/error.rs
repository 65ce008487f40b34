//! Crypto error types.

/// Errors from cryptographic and key-storage operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Peer public key is malformed, on the wrong curve, or the identity key
    /// is not available for agreement.
    #[error("Key agreement failed: {0}")]
    KeyAgreement(String),

    /// AEAD tag verification failed: wrong key, tampered data, or the wrong
    /// contact was selected.
    #[error("Authentication failed: wrong contact or corrupted message")]
    Authentication,

    /// Input could not be decoded (bad base64, too short, bad framing, not UTF-8).
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Exchange text does not decode to a P-256 public key.
    #[error("Invalid public key: {0}")]
    InvalidKey(String),

    /// The secure key-storage boundary cannot be reached.
    #[error("Secure key storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("No active contact selected")]
    NoActiveContact,

    #[error("Unknown contact: {0}")]
    UnknownContact(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Whether this error is an authentication (tag) failure.
    ///
    /// Retrying the same input cannot change the outcome of these.
    pub const fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication)
    }
}
