//! Contacts and the encrypted-at-rest contact store.
//!
//! The whole contact list is serialized to JSON and sealed as one
//! AES-256-GCM envelope under a symmetric key held in the [`KeyVault`]
//! under its own alias. Only `{id, name, publicKeyBase64, fingerprint}` is
//! written; each contact's session key is recomputed from the identity key
//! on every load and never touches disk.
//!
//! Every mutation rewrites the full list. Callers must serialize access.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::envelope::Envelope;
use crate::error::CryptoError;
use crate::exchange;
use crate::fingerprint::fingerprint;
use crate::identity::IdentityKeyStore;
use crate::kdf::SessionKey;
use crate::vault::KeyVault;

/// Vault alias of the contact-store key. Distinct from the identity alias.
pub const CONTACTS_KEY_ALIAS: &str = "sebo_contacts_key";

/// Default file name of the encrypted contact blob.
pub const CONTACTS_FILE: &str = "contacts.enc";

/// A paired peer.
///
/// Two contacts are equal when their ids are equal.
#[derive(Clone)]
pub struct Contact {
    pub id: String,
    pub name: String,
    /// Exchange text of the peer key: `base64(SPKI DER)`.
    pub public_key_base64: String,
    pub fingerprint: String,
    session_key: Option<SessionKey>,
}

impl std::fmt::Debug for Contact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field(
                "session_key",
                &self.session_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl PartialEq for Contact {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Contact {}

impl std::hash::Hash for Contact {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Contact {
    /// A new contact with a fresh random id.
    pub fn new(
        name: impl Into<String>,
        public_key_base64: impl Into<String>,
        fingerprint: impl Into<String>,
        session_key: SessionKey,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            public_key_base64: public_key_base64.into(),
            fingerprint: fingerprint.into(),
            session_key: Some(session_key),
        }
    }

    /// Session key for this contact, if it has not been wiped.
    pub const fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Zero and drop the in-memory session key.
    pub fn wipe(&mut self) {
        if let Some(mut key) = self.session_key.take() {
            key.zeroize();
        }
    }

    fn to_record(&self) -> ContactRecord {
        ContactRecord {
            id: self.id.clone(),
            name: self.name.clone(),
            public_key_base64: self.public_key_base64.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Persisted form of a contact. The session key is deliberately absent.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactRecord {
    id: String,
    name: String,
    public_key_base64: String,
    #[serde(default)]
    fingerprint: String,
}

/// Encrypted contact list on disk.
#[derive(Debug, Clone)]
pub struct ContactStore {
    vault: Arc<KeyVault>,
    identity: IdentityKeyStore,
    path: PathBuf,
    alias: String,
}

impl ContactStore {
    pub fn new(vault: Arc<KeyVault>, identity: IdentityKeyStore, path: impl Into<PathBuf>) -> Self {
        Self {
            vault,
            identity,
            path: path.into(),
            alias: CONTACTS_KEY_ALIAS.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Seal `plaintext` under the store key, creating the key on first use.
    ///
    /// Output is always the single-token `base64(nonce || ciphertext || tag)`
    /// form used for messages, never the colon-delimited `nonce:ciphertext`
    /// form. [`decrypt_blob`](Self::decrypt_blob) still reads the latter.
    pub fn encrypt_blob(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        self.vault.ensure_aes_key(&self.alias)?;
        Ok(self.vault.seal(&self.alias, plaintext)?.encode())
    }

    /// Open a sealed blob.
    ///
    /// Accepts the canonical form and the older colon-delimited one. Every
    /// failure, including a tag mismatch, is a `Decryption` error.
    pub fn decrypt_blob(&self, text: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        let envelope = if text.contains(':') {
            Envelope::decode_delimited(text)?
        } else {
            Envelope::decode(text)?
        };
        match self.vault.open(&self.alias, &envelope) {
            Ok(plaintext) => Ok(Zeroizing::new(plaintext)),
            Err(CryptoError::Authentication) => Err(CryptoError::Decryption(
                "contact store tag mismatch".into(),
            )),
            Err(e) => Err(e),
        }
    }

    /// Load every contact and recompute its session key.
    ///
    /// Never fails: a missing, unreadable or corrupt store yields an empty
    /// list, and individual records that cannot be restored are dropped.
    pub fn load_all(&self) -> Vec<Contact> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no contact store yet");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "contact store unreadable");
                return Vec::new();
            }
        };

        let plaintext = match self.decrypt_blob(&text) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "contact store could not be decrypted");
                return Vec::new();
            }
        };

        let values: Vec<serde_json::Value> = match serde_json::from_slice(&plaintext) {
            Ok(values) => values,
            Err(e) => {
                warn!(error = %e, "contact store is not a JSON array");
                return Vec::new();
            }
        };

        let contacts: Vec<Contact> = values
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match self.restore(value) {
                Ok(contact) => Some(contact),
                Err(e) => {
                    warn!(index, error = %e, "dropping unreadable contact record");
                    None
                }
            })
            .collect();
        debug!(count = contacts.len(), "contacts loaded");
        contacts
    }

    fn restore(&self, value: serde_json::Value) -> Result<Contact, CryptoError> {
        let record: ContactRecord = serde_json::from_value(value)
            .map_err(|e| CryptoError::Serialization(e.to_string()))?;
        let der = exchange::decode_der(&record.public_key_base64)?;
        let peer = exchange::public_key_from_der(&der)?;
        let computed = fingerprint(&der);
        if !record.fingerprint.is_empty() && record.fingerprint != computed {
            warn!(id = %record.id, "stored fingerprint does not match key, using recomputed value");
        }
        Ok(Contact {
            id: record.id,
            name: record.name,
            public_key_base64: record.public_key_base64,
            fingerprint: computed,
            session_key: Some(self.identity.session_key_for(&peer)?),
        })
    }

    /// Build a new contact from pasted or scanned key text.
    ///
    /// The text is trimmed; it must decode to a P-256 key.
    pub fn build_contact(&self, name: &str, key_text: &str) -> Result<Contact, CryptoError> {
        let key_text = key_text.trim();
        let der = exchange::decode_der(key_text)?;
        let peer = exchange::public_key_from_der(&der)?;
        let session_key = self.identity.session_key_for(&peer)?;
        Ok(Contact::new(name, key_text, fingerprint(&der), session_key))
    }

    /// Insert or replace `contact` (matched by id) and persist.
    pub fn save(&self, contact: &Contact, existing: &[Contact]) -> Result<Vec<Contact>, CryptoError> {
        let mut updated: Vec<Contact> = existing
            .iter()
            .filter(|c| c.id != contact.id)
            .cloned()
            .collect();
        updated.push(contact.clone());
        self.persist(&updated)?;
        info!(id = %contact.id, count = updated.len(), "contact saved");
        Ok(updated)
    }

    /// Remove the contact with `id` and persist.
    pub fn delete(&self, id: &str, existing: &[Contact]) -> Result<Vec<Contact>, CryptoError> {
        if !existing.iter().any(|c| c.id == id) {
            return Err(CryptoError::UnknownContact(id.to_string()));
        }
        let updated: Vec<Contact> = existing.iter().filter(|c| c.id != id).cloned().collect();
        self.persist(&updated)?;
        info!(id, count = updated.len(), "contact deleted");
        Ok(updated)
    }

    /// Change the display name of the contact with `id` and persist.
    pub fn rename(
        &self,
        id: &str,
        new_name: &str,
        existing: &[Contact],
    ) -> Result<Vec<Contact>, CryptoError> {
        if !existing.iter().any(|c| c.id == id) {
            return Err(CryptoError::UnknownContact(id.to_string()));
        }
        let new_name = new_name.trim();
        if new_name.is_empty() {
            debug!(id, "ignoring rename to a blank name");
            return Ok(existing.to_vec());
        }
        let updated: Vec<Contact> = existing
            .iter()
            .map(|c| {
                let mut c = c.clone();
                if c.id == id {
                    c.name = new_name.to_string();
                }
                c
            })
            .collect();
        self.persist(&updated)?;
        info!(id, "contact renamed");
        Ok(updated)
    }

    fn persist(&self, contacts: &[Contact]) -> Result<(), CryptoError> {
        let records: Vec<ContactRecord> = contacts.iter().map(Contact::to_record).collect();
        let json = Zeroizing::new(
            serde_json::to_vec(&records).map_err(|e| CryptoError::Serialization(e.to_string()))?,
        );
        let blob = self.encrypt_blob(&json)?;
        write_atomic(&self.path, blob.as_bytes())
    }
}

/// Write via a sibling temp file and rename, owner-only on Unix.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CryptoError> {
    use std::io::Write;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&tmp)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
