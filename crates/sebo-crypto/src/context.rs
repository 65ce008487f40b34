//! Process-wide crypto context.
//!
//! [`CryptoContext`] owns the key vault, the identity key, the contact
//! store and the loaded contact list, and tracks which contact is active
//! and whether a scanned key is waiting to be named. Front-ends build one
//! at startup and route every operation through it.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contacts::{CONTACTS_FILE, Contact, ContactStore};
use crate::error::CryptoError;
use crate::exchange;
use crate::fingerprint::{fingerprint, fingerprints_match};
use crate::identity::IdentityKeyStore;
use crate::kdf::SessionKey;
use crate::session;
use crate::vault::{FileStorage, KeyVault};

/// Sub-directory of the data dir holding file-backed keys.
pub const KEYS_DIR: &str = "keys";

/// Contact file used with [`StoragePreference::Memory`]. Its key dies with
/// the process, so it never shares a file with a persistent vault.
pub const EPHEMERAL_CONTACTS_FILE: &str = "contacts.ephemeral.enc";

/// Where long-term keys should live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoragePreference {
    /// OS credential store, falling back to files when it is unavailable.
    #[default]
    Platform,
    /// Owner-only files under the data directory.
    File,
    /// Process memory only. Contacts go to a separate scratch file that is
    /// discarded on the next open.
    Memory,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub data_dir: PathBuf,
    pub storage: StoragePreference,
}

impl ContextConfig {
    pub fn new(data_dir: impl Into<PathBuf>, storage: StoragePreference) -> Self {
        Self {
            data_dir: data_dir.into(),
            storage,
        }
    }

    /// Contact store location for this storage preference.
    pub fn contacts_path(&self) -> PathBuf {
        match self.storage {
            StoragePreference::Memory => self.data_dir.join(EPHEMERAL_CONTACTS_FILE),
            StoragePreference::Platform | StoragePreference::File => {
                self.data_dir.join(CONTACTS_FILE)
            }
        }
    }

    fn build_vault(&self) -> KeyVault {
        let files = Box::new(FileStorage::new(self.data_dir.join(KEYS_DIR)));
        match self.storage {
            StoragePreference::Memory => KeyVault::in_memory(),
            StoragePreference::File => KeyVault::new(files),
            #[cfg(feature = "os-keyring")]
            StoragePreference::Platform => KeyVault::with_fallback(
                Box::new(crate::vault::KeyringStorage::new("sebo")),
                files,
            ),
            #[cfg(not(feature = "os-keyring"))]
            StoragePreference::Platform => {
                warn!("built without OS keyring support, keys are stored in files");
                KeyVault::new(files)
            }
        }
    }
}

/// Add-contact flow.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PairingState {
    #[default]
    Idle,
    /// A key was scanned or pasted and is waiting for a name.
    PendingNaming { key_text: String },
}

/// Outcome of a trust-on-first-use lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCheck {
    /// Nobody stored has this key.
    New { fingerprint: String },
    /// The key already belongs to a stored contact.
    Known { id: String, name: String },
}

pub struct CryptoContext {
    identity: IdentityKeyStore,
    store: ContactStore,
    contacts: Vec<Contact>,
    active: Option<String>,
    pairing: PairingState,
}

impl std::fmt::Debug for CryptoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoContext")
            .field("identity", &self.identity)
            .field("contacts", &self.contacts.len())
            .field("active", &self.active)
            .field("pairing", &self.pairing)
            .finish_non_exhaustive()
    }
}

impl CryptoContext {
    /// Open the context described by `config`.
    pub fn open(config: &ContextConfig) -> Result<Self, CryptoError> {
        let vault = Arc::new(config.build_vault());
        let contacts_path = config.contacts_path();
        if config.storage == StoragePreference::Memory {
            match std::fs::remove_file(&contacts_path) {
                Ok(()) => {
                    debug!(path = %contacts_path.display(), "discarded stale ephemeral contacts");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Self::with_vault(vault, contacts_path)
    }

    /// Open a context over an existing vault and contact file.
    ///
    /// Generates the identity key if needed, loads contacts, and activates
    /// the first one.
    pub fn with_vault(
        vault: Arc<KeyVault>,
        contacts_path: impl Into<PathBuf>,
    ) -> Result<Self, CryptoError> {
        let identity = IdentityKeyStore::new(Arc::clone(&vault));
        let backing = identity.generate_if_absent()?;
        let store = ContactStore::new(vault, identity.clone(), contacts_path);
        let contacts = store.load_all();
        let active = contacts.first().map(|c| c.id.clone());
        info!(%backing, contacts = contacts.len(), "crypto context ready");
        Ok(Self {
            identity,
            store,
            contacts,
            active,
            pairing: PairingState::Idle,
        })
    }

    pub const fn identity(&self) -> &IdentityKeyStore {
        &self.identity
    }

    pub const fn store(&self) -> &ContactStore {
        &self.store
    }

    /// Our public key as exchange text.
    pub fn my_public_key_text(&self) -> Result<String, CryptoError> {
        Ok(exchange::encode(&self.identity.public_key_der()?))
    }

    pub fn my_fingerprint(&self) -> Result<String, CryptoError> {
        self.identity.fingerprint()
    }

    /// Our public key as a `size`×`size` QR bitmap.
    #[cfg(feature = "qr")]
    pub fn my_qr(&self, size: usize) -> Result<exchange::QrBitmap, CryptoError> {
        exchange::render_qr(&self.my_public_key_text()?, size)
    }

    // --- Pairing ---

    /// Hold a scanned key until it is named. Replaces any pending key.
    pub fn on_key_scanned(&mut self, key_text: &str) {
        if matches!(self.pairing, PairingState::PendingNaming { .. }) {
            debug!("discarding previously scanned key");
        }
        self.pairing = PairingState::PendingNaming {
            key_text: key_text.trim().to_string(),
        };
    }

    pub const fn pairing(&self) -> &PairingState {
        &self.pairing
    }

    pub fn cancel_pending(&mut self) {
        self.pairing = PairingState::Idle;
    }

    /// Name the pending key and store it as a contact.
    ///
    /// On failure the pending key is kept so the caller can retry.
    pub fn confirm_pending(&mut self, name: &str) -> Result<&Contact, CryptoError> {
        let PairingState::PendingNaming { key_text } = &self.pairing else {
            return Err(CryptoError::InvalidKey("no scanned key is pending".into()));
        };
        let key_text = key_text.clone();
        let index = self.insert_contact(name, &key_text)?;
        self.pairing = PairingState::Idle;
        Ok(&self.contacts[index])
    }

    /// Add a contact from pasted key text and make it active.
    ///
    /// A blank name becomes `Contact N`.
    pub fn add_contact(&mut self, name: &str, key_text: &str) -> Result<&Contact, CryptoError> {
        let index = self.insert_contact(name, key_text)?;
        Ok(&self.contacts[index])
    }

    fn insert_contact(&mut self, name: &str, key_text: &str) -> Result<usize, CryptoError> {
        let name = match name.trim() {
            "" => format!("Contact {}", self.contacts.len() + 1),
            trimmed => trimmed.to_string(),
        };
        let contact = self.store.build_contact(&name, key_text)?;
        if let KeyCheck::Known { id, name } = self.lookup_fingerprint(contact.fingerprint.clone()) {
            warn!(existing = %id, %name, "adding a key that is already stored");
        }
        self.contacts = self.store.save(&contact, &self.contacts)?;
        self.active = Some(contact.id.clone());
        self.contacts
            .iter()
            .position(|c| c.id == contact.id)
            .ok_or(CryptoError::UnknownContact(contact.id))
    }

    /// Look up whether `key_text` already belongs to a stored contact.
    pub fn check_key(&self, key_text: &str) -> Result<KeyCheck, CryptoError> {
        let fp = fingerprint(&exchange::decode_der(key_text)?);
        Ok(self.lookup_fingerprint(fp))
    }

    fn lookup_fingerprint(&self, fp: String) -> KeyCheck {
        self.contacts
            .iter()
            .find(|c| fingerprints_match(&c.fingerprint, &fp))
            .map_or(KeyCheck::New { fingerprint: fp }, |c| KeyCheck::Known {
                id: c.id.clone(),
                name: c.name.clone(),
            })
    }

    /// Compare a contact's fingerprint with one obtained out-of-band.
    pub fn verify_fingerprint(&self, id: &str, expected: &str) -> Result<bool, CryptoError> {
        let contact = self.require(id)?;
        Ok(fingerprints_match(&contact.fingerprint, expected))
    }

    // --- Contacts ---

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn contact(&self, id: &str) -> Option<&Contact> {
        self.contacts.iter().find(|c| c.id == id)
    }

    pub fn active_contact(&self) -> Option<&Contact> {
        self.active.as_deref().and_then(|id| self.contact(id))
    }

    pub fn select(&mut self, id: &str) -> Result<&Contact, CryptoError> {
        let index = self
            .contacts
            .iter()
            .position(|c| c.id == id)
            .ok_or_else(|| CryptoError::UnknownContact(id.to_string()))?;
        self.active = Some(id.to_string());
        Ok(&self.contacts[index])
    }

    pub fn rename(&mut self, id: &str, new_name: &str) -> Result<(), CryptoError> {
        self.contacts = self.store.rename(id, new_name, &self.contacts)?;
        Ok(())
    }

    /// Delete a contact. Deleting the active one activates the first left.
    pub fn delete(&mut self, id: &str) -> Result<(), CryptoError> {
        let mut previous = std::mem::take(&mut self.contacts);
        match self.store.delete(id, &previous) {
            Ok(updated) => self.contacts = updated,
            Err(e) => {
                self.contacts = previous;
                return Err(e);
            }
        }
        previous.iter_mut().for_each(Contact::wipe);

        if self.active.as_deref() == Some(id) {
            self.active = self.contacts.first().map(|c| c.id.clone());
        }
        Ok(())
    }

    // --- Messages ---

    /// Encrypt with the active contact's session key.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let contact = self.active_contact().ok_or(CryptoError::NoActiveContact)?;
        session::encrypt(plaintext, session_key(contact)?)
    }

    /// Decrypt with the active contact's session key.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CryptoError> {
        let contact = self.active_contact().ok_or(CryptoError::NoActiveContact)?;
        session::decrypt(ciphertext, session_key(contact)?)
    }

    pub fn encrypt_for(&self, id: &str, plaintext: &str) -> Result<String, CryptoError> {
        session::encrypt(plaintext, session_key(self.require(id)?)?)
    }

    pub fn decrypt_from(&self, id: &str, ciphertext: &str) -> Result<String, CryptoError> {
        session::decrypt(ciphertext, session_key(self.require(id)?)?)
    }

    fn require(&self, id: &str) -> Result<&Contact, CryptoError> {
        self.contact(id)
            .ok_or_else(|| CryptoError::UnknownContact(id.to_string()))
    }
}

fn session_key(contact: &Contact) -> Result<&SessionKey, CryptoError> {
    contact.session_key().ok_or_else(|| {
        CryptoError::KeyAgreement(format!("session key for {} was wiped", contact.id))
    })
}

impl Drop for CryptoContext {
    fn drop(&mut self) {
        self.contacts.iter_mut().for_each(Contact::wipe);
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Device {
        _dir: tempfile::TempDir,
        ctx: CryptoContext,
    }

    fn device() -> Device {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CryptoContext::with_vault(
            Arc::new(KeyVault::in_memory()),
            dir.path().join(CONTACTS_FILE),
        )
        .unwrap();
        Device { _dir: dir, ctx }
    }

    #[test]
    fn fresh_context_has_no_active_contact() {
        let d = device();
        assert!(d.ctx.contacts().is_empty());
        assert!(matches!(d.ctx.encrypt("x"), Err(CryptoError::NoActiveContact)));
        assert!(matches!(d.ctx.decrypt("x"), Err(CryptoError::NoActiveContact)));
    }

    #[test]
    fn alice_and_bob_exchange_a_message() {
        let mut alice = device();
        let mut bob = device();
        let alice_key = alice.ctx.my_public_key_text().unwrap();
        let bob_key = bob.ctx.my_public_key_text().unwrap();

        alice.ctx.add_contact("Bob", &bob_key).unwrap();
        bob.ctx.add_contact("Alice", &alice_key).unwrap();

        let ct = alice.ctx.encrypt("hallo welt").unwrap();
        assert_eq!(bob.ctx.decrypt(&ct).unwrap(), "hallo welt");
    }

    #[test]
    fn scan_then_confirm_stores_and_activates() {
        let mut alice = device();
        let bob = device();
        alice.ctx.on_key_scanned(&bob.ctx.my_public_key_text().unwrap());
        assert!(matches!(alice.ctx.pairing(), PairingState::PendingNaming { .. }));

        let id = alice.ctx.confirm_pending("Bob").unwrap().id.clone();
        assert_eq!(alice.ctx.pairing(), &PairingState::Idle);
        assert_eq!(alice.ctx.active_contact().unwrap().id, id);
    }

    #[test]
    fn second_scan_replaces_pending_key() {
        let mut alice = device();
        let bob = device();
        let carol = device();
        alice.ctx.on_key_scanned(&bob.ctx.my_public_key_text().unwrap());
        alice.ctx.on_key_scanned(&carol.ctx.my_public_key_text().unwrap());

        let contact = alice.ctx.confirm_pending("Someone").unwrap();
        assert_eq!(contact.fingerprint, carol.ctx.my_fingerprint().unwrap());
    }

    #[test]
    fn confirm_without_pending_key_fails() {
        let mut d = device();
        assert!(matches!(
            d.ctx.confirm_pending("Bob"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn confirm_with_bad_key_keeps_it_pending() {
        let mut d = device();
        d.ctx.on_key_scanned("garbage");
        assert!(d.ctx.confirm_pending("Bob").is_err());
        assert_eq!(
            d.ctx.pairing(),
            &PairingState::PendingNaming {
                key_text: "garbage".into()
            }
        );
        d.ctx.cancel_pending();
        assert_eq!(d.ctx.pairing(), &PairingState::Idle);
    }

    #[test]
    fn blank_name_gets_numbered_default() {
        let mut d = device();
        let a = device();
        let b = device();
        d.ctx
            .add_contact("  ", &a.ctx.my_public_key_text().unwrap())
            .unwrap();
        let second = d
            .ctx
            .add_contact("", &b.ctx.my_public_key_text().unwrap())
            .unwrap();
        assert_eq!(second.name, "Contact 2");
        assert_eq!(d.ctx.contacts()[0].name, "Contact 1");
    }

    #[test]
    fn check_key_reports_known_contacts() {
        let mut d = device();
        let bob = device();
        let bob_key = bob.ctx.my_public_key_text().unwrap();
        assert_eq!(
            d.ctx.check_key(&bob_key).unwrap(),
            KeyCheck::New {
                fingerprint: bob.ctx.my_fingerprint().unwrap()
            }
        );
        let id = d.ctx.add_contact("Bob", &bob_key).unwrap().id.clone();
        assert_eq!(
            d.ctx.check_key(&bob_key).unwrap(),
            KeyCheck::Known {
                id,
                name: "Bob".into()
            }
        );
    }

    #[test]
    fn adding_a_stored_key_again_keeps_both_entries() {
        let mut d = device();
        let bob = device();
        let bob_key = bob.ctx.my_public_key_text().unwrap();
        let first = d.ctx.add_contact("Bob", &bob_key).unwrap().id.clone();
        let second = d.ctx.add_contact("Bobby", &bob_key).unwrap().id.clone();
        assert_ne!(first, second);
        assert_eq!(d.ctx.contacts().len(), 2);
        assert_eq!(d.ctx.active_contact().unwrap().id, second);
        assert_eq!(
            d.ctx.contact(&first).unwrap().fingerprint,
            d.ctx.contact(&second).unwrap().fingerprint
        );
    }

    #[test]
    fn verify_fingerprint_ignores_case_and_separators() {
        let mut d = device();
        let bob = device();
        let id = d
            .ctx
            .add_contact("Bob", &bob.ctx.my_public_key_text().unwrap())
            .unwrap()
            .id
            .clone();
        let spoken = bob.ctx.my_fingerprint().unwrap().replace(':', " ").to_lowercase();
        assert!(d.ctx.verify_fingerprint(&id, &spoken).unwrap());
        assert!(!d.ctx.verify_fingerprint(&id, &d.ctx.my_fingerprint().unwrap()).unwrap());
    }

    #[test]
    fn deleting_active_contact_activates_first_remaining() {
        let mut d = device();
        let a = device();
        let b = device();
        let first = d
            .ctx
            .add_contact("A", &a.ctx.my_public_key_text().unwrap())
            .unwrap()
            .id
            .clone();
        let second = d
            .ctx
            .add_contact("B", &b.ctx.my_public_key_text().unwrap())
            .unwrap()
            .id
            .clone();
        assert_eq!(d.ctx.active_contact().unwrap().id, second);

        d.ctx.delete(&second).unwrap();
        assert_eq!(d.ctx.active_contact().unwrap().id, first);
        d.ctx.delete(&first).unwrap();
        assert!(d.ctx.active_contact().is_none());
    }

    #[test]
    fn delete_unknown_contact_keeps_list() {
        let mut d = device();
        let a = device();
        d.ctx
            .add_contact("A", &a.ctx.my_public_key_text().unwrap())
            .unwrap();
        assert!(matches!(
            d.ctx.delete("missing"),
            Err(CryptoError::UnknownContact(_))
        ));
        assert_eq!(d.ctx.contacts().len(), 1);
    }

    #[test]
    fn select_and_rename() {
        let mut d = device();
        let a = device();
        let b = device();
        let first = d
            .ctx
            .add_contact("A", &a.ctx.my_public_key_text().unwrap())
            .unwrap()
            .id
            .clone();
        d.ctx
            .add_contact("B", &b.ctx.my_public_key_text().unwrap())
            .unwrap();
        d.ctx.select(&first).unwrap();
        d.ctx.rename(&first, "Anna").unwrap();
        assert_eq!(d.ctx.active_contact().unwrap().name, "Anna");
        assert!(matches!(
            d.ctx.select("missing"),
            Err(CryptoError::UnknownContact(_))
        ));
    }

    #[test]
    fn decrypt_from_wrong_contact_is_authentication_error() {
        let mut alice = device();
        let bob = device();
        let carol = device();
        let bob_id = alice
            .ctx
            .add_contact("Bob", &bob.ctx.my_public_key_text().unwrap())
            .unwrap()
            .id
            .clone();
        let carol_id = alice
            .ctx
            .add_contact("Carol", &carol.ctx.my_public_key_text().unwrap())
            .unwrap()
            .id
            .clone();
        let ct = alice.ctx.encrypt_for(&bob_id, "for bob").unwrap();
        assert!(alice.ctx.decrypt_from(&carol_id, &ct).unwrap_err().is_authentication());
        assert_eq!(alice.ctx.decrypt_from(&bob_id, &ct).unwrap(), "for bob");
    }

    #[test]
    fn reopening_restores_contacts_and_first_is_active() {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(KeyVault::in_memory());
        let path = dir.path().join(CONTACTS_FILE);
        let bob = device();
        let id = {
            let mut ctx = CryptoContext::with_vault(Arc::clone(&vault), &path).unwrap();
            ctx.add_contact("Bob", &bob.ctx.my_public_key_text().unwrap())
                .unwrap()
                .id
                .clone()
        };
        let ctx = CryptoContext::with_vault(vault, &path).unwrap();
        assert_eq!(ctx.active_contact().unwrap().id, id);
    }

    #[test]
    fn file_backed_context_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContextConfig::new(dir.path(), StoragePreference::File);
        let bob = device();
        let (fp, id) = {
            let mut ctx = CryptoContext::open(&config).unwrap();
            let id = ctx
                .add_contact("Bob", &bob.ctx.my_public_key_text().unwrap())
                .unwrap()
                .id
                .clone();
            (ctx.my_fingerprint().unwrap(), id)
        };
        let ctx = CryptoContext::open(&config).unwrap();
        assert_eq!(ctx.my_fingerprint().unwrap(), fp);
        assert!(ctx.contact(&id).is_some());
    }

    #[test]
    fn memory_backed_context_leaves_persistent_contacts_alone() {
        let dir = tempfile::tempdir().unwrap();
        let persistent = ContextConfig::new(dir.path(), StoragePreference::File);
        let (alice, bob) = (device(), device());
        {
            let mut ctx = CryptoContext::open(&persistent).unwrap();
            ctx.add_contact("Alice", &alice.ctx.my_public_key_text().unwrap())
                .unwrap();
            ctx.add_contact("Bob", &bob.ctx.my_public_key_text().unwrap())
                .unwrap();
        }
        let before = std::fs::read(dir.path().join(CONTACTS_FILE)).unwrap();

        let scratch = ContextConfig::new(dir.path(), StoragePreference::Memory);
        {
            let mut ctx = CryptoContext::open(&scratch).unwrap();
            assert!(ctx.contacts().is_empty());
            ctx.add_contact("Temp", &device().ctx.my_public_key_text().unwrap())
                .unwrap();
        }
        assert!(dir.path().join(EPHEMERAL_CONTACTS_FILE).exists());
        assert!(CryptoContext::open(&scratch).unwrap().contacts().is_empty());

        assert_eq!(std::fs::read(dir.path().join(CONTACTS_FILE)).unwrap(), before);
        let names: Vec<_> = CryptoContext::open(&persistent)
            .unwrap()
            .contacts()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[cfg(feature = "qr")]
    #[test]
    fn my_qr_renders() {
        let d = device();
        let bmp = d.ctx.my_qr(512).unwrap();
        assert_eq!(bmp.size(), 512);
    }
}
