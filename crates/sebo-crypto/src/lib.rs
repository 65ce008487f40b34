//! Sebo pairwise E2E encryption library
//!
//! Two devices exchange public keys out-of-band (QR code or pasted text)
//! and derive a shared key for encrypting short text messages that are then
//! carried by any other channel.
//!
//! ## Crypto primitives
//!
//! - **Identity**: long-term P-256 keypair per device, held in a [`KeyVault`]
//! - **Agreement**: static ECDH → HKDF-SHA256 (no salt, info `e2ee-chat-v1`) → 256-bit session key
//! - **Encryption**: AES-256-GCM, fresh random 96-bit nonce per message
//! - **Verification**: SHA-256 fingerprint of the SPKI-encoded public key (TOFU)
//!
//! Contacts are stored as a single AES-GCM blob under a second vault key;
//! session keys are recomputed on load and never persisted.

pub mod contacts;
pub mod context;
pub mod envelope;
pub mod error;
pub mod exchange;
pub mod fingerprint;
pub mod identity;
pub mod kdf;
pub mod session;
pub mod vault;

pub use contacts::{CONTACTS_FILE, CONTACTS_KEY_ALIAS, Contact, ContactStore};
pub use context::{
    ContextConfig, CryptoContext, EPHEMERAL_CONTACTS_FILE, KeyCheck, PairingState,
    StoragePreference,
};
pub use envelope::{Envelope, NONCE_SIZE, TAG_SIZE};
pub use error::CryptoError;
pub use fingerprint::{fingerprint, fingerprints_match, format_fingerprint_display};
pub use identity::{IDENTITY_ALIAS, IdentityKeyStore};
pub use kdf::{DEFAULT_INFO, SessionKey, derive_session_key, derive_session_key_with_info};
pub use session::{CipherMessage, decrypt, encrypt};
#[cfg(feature = "os-keyring")]
pub use vault::KeyringStorage;
pub use vault::{Backing, FileStorage, KeyVault, MemoryStorage, SecretStorage};
