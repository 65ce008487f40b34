//! Secure key-storage boundary.
//!
//! Long-term keys (the P-256 identity key and the contact-store AES key)
//! are addressed by alias and only ever used through [`KeyVault`]: ECDH,
//! public-key export, and AES-GCM seal/open. Raw key material is loaded
//! into zeroizing buffers for the duration of one operation and never
//! handed back to the caller.
//!
//! Storage backends implement [`SecretStorage`]:
//!
//! - `KeyringStorage` (feature `os-keyring`): the OS credential store
//! - [`FileStorage`]: owner-only files in a private directory
//! - [`MemoryStorage`]: process memory, for tests and throwaway sessions
//!
//! A vault has a preferred backend and an optional fallback. Key
//! generation that fails on the preferred backend is retried on the
//! fallback instead of failing outright.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use p256::{PublicKey, SecretKey};
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{debug, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::envelope::{Envelope, KEY_SIZE};
use crate::error::CryptoError;

/// Which kind of storage holds a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backing {
    /// OS-provided credential store.
    Platform,
    /// Owner-only files on disk.
    Software,
    /// Process memory; lost at exit.
    Memory,
}

impl std::fmt::Display for Backing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Platform => f.write_str("platform"),
            Self::Software => f.write_str("software"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

/// Alias-addressed slots for secret key bytes.
pub trait SecretStorage: Send + Sync {
    fn backing(&self) -> Backing;

    /// Read the secret under `alias`, or `None` if the slot is empty.
    fn read(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError>;

    /// Write (or overwrite) the secret under `alias`.
    fn write(&self, alias: &str, secret: &[u8]) -> Result<(), CryptoError>;

    /// Remove the secret under `alias`. Returns whether anything was removed.
    fn remove(&self, alias: &str) -> Result<bool, CryptoError>;
}

/// In-memory storage.
#[derive(Default)]
pub struct MemoryStorage {
    slots: RwLock<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStorage for MemoryStorage {
    fn backing(&self) -> Backing {
        Backing::Memory
    }

    fn read(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        Ok(self.slots.read().get(alias).cloned())
    }

    fn write(&self, alias: &str, secret: &[u8]) -> Result<(), CryptoError> {
        self.slots
            .write()
            .insert(alias.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn remove(&self, alias: &str) -> Result<bool, CryptoError> {
        Ok(self.slots.write().remove(alias).is_some())
    }
}

/// One owner-only file per alias inside `dir`.
///
/// On Unix, files are created with mode 0600 and refused on read if their
/// permissions are any wider.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn slot_path(&self, alias: &str) -> Result<PathBuf, CryptoError> {
        let valid = !alias.is_empty()
            && alias
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !alias.starts_with('.');
        if !valid {
            return Err(CryptoError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid key alias: {alias:?}"),
            )));
        }
        Ok(self.dir.join(format!("{alias}.key")))
    }
}

impl SecretStorage for FileStorage {
    fn backing(&self) -> Backing {
        Backing::Software
    }

    fn read(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        let path = self.slot_path(alias)?;
        if !path.exists() {
            return Ok(None);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::StorageUnavailable(format!(
                    "key file {} has insecure permissions: {mode:o} (expected 600)",
                    path.display()
                )));
            }
        }

        Ok(Some(Zeroizing::new(std::fs::read(&path)?)))
    }

    fn write(&self, alias: &str, secret: &[u8]) -> Result<(), CryptoError> {
        use std::io::Write;

        let path = self.slot_path(alias)?;
        std::fs::create_dir_all(&self.dir)?;

        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(secret)?;
        file.sync_all()?;

        // An existing file keeps its old mode through truncate.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn remove(&self, alias: &str) -> Result<bool, CryptoError> {
        let path = self.slot_path(alias)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// OS credential store (macOS/iOS Keychain, Windows Credential Manager,
/// Linux kernel keyring). Secrets are stored hex-encoded.
#[cfg(feature = "os-keyring")]
#[derive(Debug, Clone)]
pub struct KeyringStorage {
    service: String,
}

#[cfg(feature = "os-keyring")]
impl KeyringStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, alias: &str) -> Result<keyring::Entry, CryptoError> {
        keyring::Entry::new(&self.service, alias)
            .map_err(|e| CryptoError::StorageUnavailable(format!("keyring entry {alias}: {e}")))
    }
}

#[cfg(feature = "os-keyring")]
impl SecretStorage for KeyringStorage {
    fn backing(&self) -> Backing {
        Backing::Platform
    }

    fn read(&self, alias: &str) -> Result<Option<Zeroizing<Vec<u8>>>, CryptoError> {
        match self.entry(alias)?.get_password() {
            Ok(mut encoded) => {
                let decoded = hex::decode(&encoded);
                encoded.zeroize();
                let bytes = decoded.map_err(|e| {
                    CryptoError::StorageUnavailable(format!("corrupt keyring entry {alias}: {e}"))
                })?;
                Ok(Some(Zeroizing::new(bytes)))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CryptoError::StorageUnavailable(format!(
                "keyring read {alias}: {e}"
            ))),
        }
    }

    fn write(&self, alias: &str, secret: &[u8]) -> Result<(), CryptoError> {
        let encoded = Zeroizing::new(hex::encode(secret));
        self.entry(alias)?
            .set_password(&encoded)
            .map_err(|e| CryptoError::StorageUnavailable(format!("keyring write {alias}: {e}")))
    }

    fn remove(&self, alias: &str) -> Result<bool, CryptoError> {
        match self.entry(alias)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(CryptoError::StorageUnavailable(format!(
                "keyring delete {alias}: {e}"
            ))),
        }
    }
}

/// Performs key operations by alias without exposing key material.
pub struct KeyVault {
    preferred: Box<dyn SecretStorage>,
    fallback: Option<Box<dyn SecretStorage>>,
}

impl std::fmt::Debug for KeyVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyVault")
            .field("preferred", &self.preferred.backing())
            .field("fallback", &self.fallback.as_ref().map(|s| s.backing()))
            .finish()
    }
}

impl KeyVault {
    pub fn new(preferred: Box<dyn SecretStorage>) -> Self {
        Self {
            preferred,
            fallback: None,
        }
    }

    pub fn with_fallback(
        preferred: Box<dyn SecretStorage>,
        fallback: Box<dyn SecretStorage>,
    ) -> Self {
        Self {
            preferred,
            fallback: Some(fallback),
        }
    }

    /// A vault that forgets everything at process exit.
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStorage::new()))
    }

    /// Find the secret under `alias`, preferred backend first.
    fn locate(&self, alias: &str) -> Result<Option<(Backing, Zeroizing<Vec<u8>>)>, CryptoError> {
        match self.preferred.read(alias) {
            Ok(Some(secret)) => return Ok(Some((self.preferred.backing(), secret))),
            Ok(None) => {}
            Err(e) if self.fallback.is_some() => {
                warn!(alias, error = %e, "preferred key storage unreadable, trying fallback");
            }
            Err(e) => return Err(e),
        }
        match &self.fallback {
            Some(fallback) => Ok(fallback.read(alias)?.map(|s| (fallback.backing(), s))),
            None => Ok(None),
        }
    }

    /// Which backing holds `alias`, if any.
    pub fn backing_of(&self, alias: &str) -> Result<Option<Backing>, CryptoError> {
        Ok(self.locate(alias)?.map(|(backing, _)| backing))
    }

    pub fn contains(&self, alias: &str) -> Result<bool, CryptoError> {
        Ok(self.backing_of(alias)?.is_some())
    }

    fn ensure_with(
        &self,
        alias: &str,
        generate: impl FnOnce() -> Zeroizing<Vec<u8>>,
    ) -> Result<Backing, CryptoError> {
        let unreadable = match self.preferred.read(alias) {
            Ok(Some(_)) => return Ok(self.preferred.backing()),
            Ok(None) => None,
            Err(e) => Some(e),
        };
        if let Some(fallback) = &self.fallback
            && fallback.read(alias)?.is_some()
        {
            return Ok(fallback.backing());
        }
        // A key we cannot read may still exist; replacing it would orphan
        // everything sealed or derived under it.
        if let Some(e) = unreadable {
            warn!(alias, error = %e, "preferred key storage unreadable, not generating");
            return Err(e);
        }

        let secret = generate();
        match self.preferred.write(alias, &secret) {
            Ok(()) => {
                let backing = self.preferred.backing();
                debug!(alias, %backing, "generated key");
                Ok(backing)
            }
            Err(e) => {
                let Some(fallback) = &self.fallback else {
                    return Err(e);
                };
                let backing = fallback.backing();
                warn!(
                    alias,
                    error = %e,
                    fallback = %backing,
                    "key generation failed on preferred storage, using fallback"
                );
                fallback.write(alias, &secret)?;
                debug!(alias, %backing, "generated key");
                Ok(backing)
            }
        }
    }

    /// Generate a P-256 keypair under `alias` unless one already exists.
    pub fn ensure_ec_key(&self, alias: &str) -> Result<Backing, CryptoError> {
        self.ensure_with(alias, || {
            let secret = SecretKey::random(&mut OsRng);
            let mut bytes = secret.to_bytes();
            let out = Zeroizing::new(bytes.to_vec());
            bytes.as_mut_slice().zeroize();
            out
        })
    }

    /// Generate a 256-bit AES key under `alias` unless one already exists.
    pub fn ensure_aes_key(&self, alias: &str) -> Result<Backing, CryptoError> {
        self.ensure_with(alias, || {
            let mut key = Zeroizing::new(vec![0u8; KEY_SIZE]);
            OsRng.fill_bytes(key.as_mut_slice());
            key
        })
    }

    fn ec_secret(&self, alias: &str) -> Result<SecretKey, CryptoError> {
        let (_, bytes) = self.locate(alias)?.ok_or_else(|| {
            CryptoError::KeyAgreement(format!("no identity key under alias {alias}"))
        })?;
        SecretKey::from_slice(&bytes)
            .map_err(|_| CryptoError::KeyAgreement(format!("stored key {alias} is not a P-256 scalar")))
    }

    fn aes_key(&self, alias: &str) -> Result<Option<Zeroizing<[u8; KEY_SIZE]>>, CryptoError> {
        let Some((_, bytes)) = self.locate(alias)? else {
            return Ok(None);
        };
        let key: [u8; KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
            CryptoError::StorageUnavailable(format!("stored key {alias} is not {KEY_SIZE} bytes"))
        })?;
        Ok(Some(Zeroizing::new(key)))
    }

    /// Public half of the EC key under `alias`.
    pub fn ec_public_key(&self, alias: &str) -> Result<PublicKey, CryptoError> {
        Ok(self.ec_secret(alias)?.public_key())
    }

    /// ECDH between the EC key under `alias` and `peer`.
    ///
    /// Returns the raw 32-byte x-coordinate of the shared point.
    pub fn ecdh(&self, alias: &str, peer: &PublicKey) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let secret = self.ec_secret(alias)?;
        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), peer.as_affine());
        let mut out = Zeroizing::new([0u8; 32]);
        out.copy_from_slice(shared.raw_secret_bytes());
        Ok(out)
    }

    /// AES-GCM encrypt under the symmetric key stored at `alias`.
    pub fn seal(&self, alias: &str, plaintext: &[u8]) -> Result<Envelope, CryptoError> {
        let key = self.aes_key(alias)?.ok_or_else(|| {
            CryptoError::StorageUnavailable(format!("no symmetric key under alias {alias}"))
        })?;
        Envelope::seal(&key, plaintext)
    }

    /// AES-GCM decrypt under the symmetric key stored at `alias`.
    pub fn open(&self, alias: &str, envelope: &Envelope) -> Result<Vec<u8>, CryptoError> {
        let key = self
            .aes_key(alias)?
            .ok_or_else(|| CryptoError::Decryption(format!("no symmetric key under alias {alias}")))?;
        envelope.open(&key)
    }

    /// Remove `alias` from every backend.
    pub fn delete(&self, alias: &str) -> Result<bool, CryptoError> {
        let mut removed = self.preferred.remove(alias)?;
        if let Some(fallback) = &self.fallback {
            removed |= fallback.remove(alias)?;
        }
        Ok(removed)
    }
}
