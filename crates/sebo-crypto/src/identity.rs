//! Device identity key.
//!
//! Each device has one long-lived P-256 keypair, generated lazily on first
//! run under a fixed alias and kept inside the [`KeyVault`]. The private
//! scalar never leaves the vault; this type only exposes the public key
//! and ECDH against a peer key.

use std::sync::Arc;

use p256::PublicKey;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::exchange;
use crate::fingerprint::fingerprint;
use crate::kdf::{SessionKey, derive_session_key};
use crate::vault::{Backing, KeyVault};

/// Vault alias of the identity keypair.
pub const IDENTITY_ALIAS: &str = "e2ee_identity_key";

/// Handle to the device identity keypair.
#[derive(Clone)]
pub struct IdentityKeyStore {
    vault: Arc<KeyVault>,
    alias: String,
}

impl std::fmt::Debug for IdentityKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyStore")
            .field("alias", &self.alias)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IdentityKeyStore {
    pub fn new(vault: Arc<KeyVault>) -> Self {
        Self::with_alias(vault, IDENTITY_ALIAS)
    }

    pub fn with_alias(vault: Arc<KeyVault>, alias: impl Into<String>) -> Self {
        Self {
            vault,
            alias: alias.into(),
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Create the keypair if the alias is empty. A no-op otherwise.
    pub fn generate_if_absent(&self) -> Result<Backing, CryptoError> {
        let backing = self.vault.ensure_ec_key(&self.alias)?;
        debug!(alias = %self.alias, %backing, "identity key ready");
        Ok(backing)
    }

    pub fn public_key(&self) -> Result<PublicKey, CryptoError> {
        self.vault.ec_public_key(&self.alias)
    }

    /// Public key as DER `SubjectPublicKeyInfo`.
    pub fn public_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        exchange::public_key_to_der(&self.public_key()?)
    }

    /// Fingerprint of our own public key, for out-of-band comparison.
    pub fn fingerprint(&self) -> Result<String, CryptoError> {
        Ok(fingerprint(&self.public_key_der()?))
    }

    /// Raw ECDH shared secret with `peer`.
    pub fn compute_shared_secret(
        &self,
        peer: &PublicKey,
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        self.vault.ecdh(&self.alias, peer)
    }

    /// ECDH against a DER-encoded peer key.
    ///
    /// A key that does not parse as P-256 is a `KeyAgreement` error here,
    /// not `InvalidKey`: the caller already believed it had a valid key.
    pub fn compute_shared_secret_der(
        &self,
        peer_der: &[u8],
    ) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let peer = exchange::public_key_from_der(peer_der)
            .map_err(|e| CryptoError::KeyAgreement(e.to_string()))?;
        self.compute_shared_secret(&peer)
    }

    /// `KDF(ECDH(identity, peer))`: the session key shared with `peer`.
    pub fn session_key_for(&self, peer: &PublicKey) -> Result<SessionKey, CryptoError> {
        let shared = self.compute_shared_secret(peer)?;
        derive_session_key(shared.as_slice())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    fn identity() -> IdentityKeyStore {
        let id = IdentityKeyStore::new(Arc::new(KeyVault::in_memory()));
        id.generate_if_absent().unwrap();
        id
    }

    #[test]
    fn generate_if_absent_is_idempotent() {
        let id = identity();
        let before = id.public_key_der().unwrap();
        id.generate_if_absent().unwrap();
        assert_eq!(id.public_key_der().unwrap(), before);
    }

    #[test]
    fn public_key_der_is_p256_spki() {
        let der = identity().public_key_der().unwrap();
        // SEQUENCE { AlgorithmIdentifier, BIT STRING(65-byte uncompressed point) }
        assert_eq!(der.len(), 91);
        assert_eq!(der[0], 0x30);
        assert_eq!(der[der.len() - 65], 0x04);
    }

    #[test]
    fn public_key_before_generation_is_key_agreement_error() {
        let id = IdentityKeyStore::new(Arc::new(KeyVault::in_memory()));
        assert!(matches!(id.public_key(), Err(CryptoError::KeyAgreement(_))));
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let alice = identity();
        let bob = identity();
        let ab = alice.compute_shared_secret(&bob.public_key().unwrap()).unwrap();
        let ba = bob.compute_shared_secret(&alice.public_key().unwrap()).unwrap();
        assert_eq!(*ab, *ba);
    }

    #[test]
    fn session_keys_agree_across_identities() {
        let alice = identity();
        let bob = identity();
        let ab = alice.session_key_for(&bob.public_key().unwrap()).unwrap();
        let ba = bob.session_key_for(&alice.public_key().unwrap()).unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn different_peers_give_different_session_keys() {
        let alice = identity();
        let bob = identity();
        let carol = identity();
        let with_bob = alice.session_key_for(&bob.public_key().unwrap()).unwrap();
        let with_carol = alice.session_key_for(&carol.public_key().unwrap()).unwrap();
        assert_ne!(with_bob, with_carol);
    }

    #[test]
    fn malformed_peer_der_is_key_agreement_error() {
        let id = identity();
        assert!(matches!(
            id.compute_shared_secret_der(&[0x30, 0x03, 0x01, 0x02, 0x03]),
            Err(CryptoError::KeyAgreement(_))
        ));
    }

    #[test]
    fn fingerprint_matches_public_key_der() {
        let id = identity();
        assert_eq!(
            id.fingerprint().unwrap(),
            fingerprint(&id.public_key_der().unwrap())
        );
    }

    #[test]
    fn debug_impl_redacts_secret() {
        let debug = format!("{:?}", identity());
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains(IDENTITY_ALIAS));
    }
}
