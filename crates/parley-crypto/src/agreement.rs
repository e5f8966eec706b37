//! ECDH key agreement.
//!
//! Both parties derive the same 32-byte secret from their own private key and
//! the other's public key. The raw x-coordinate of the shared point is used
//! directly as the AES-256-GCM key, which is what a browser gets from
//! `deriveKey({ name: "ECDH" }, ..., { name: "AES-GCM", length: 256 })`.

use std::fmt;

use p256::ecdh;
use zeroize::Zeroizing;

use crate::{
    error::CryptoError,
    keys::{PrivateKey, PublicKey},
};

/// Size of a derived shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Whether the peer public key behind a secret has been confirmed out of band.
///
/// The directory is trusted to return the right key; nothing in the protocol
/// detects a substituted one. Secrets start `Unverified` and only become
/// `Verified` when a caller compares fingerprints and says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrustLevel {
    /// Peer key taken from the directory as-is
    #[default]
    Unverified,
    /// Peer key fingerprint confirmed by the user
    Verified,
}

/// Symmetric key shared by exactly two identities.
///
/// Zeroized on drop. Equality compares key bytes only; trust level is
/// metadata about where the peer key came from.
#[derive(Clone)]
pub struct SharedSecret {
    key: Zeroizing<[u8; SHARED_SECRET_SIZE]>,
    trust: TrustLevel,
}

impl SharedSecret {
    /// Wrap raw key bytes. Trust level starts `Unverified`.
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self { key: Zeroizing::new(bytes), trust: TrustLevel::Unverified }
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.key
    }

    /// Current trust level.
    pub fn trust_level(&self) -> TrustLevel {
        self.trust
    }

    /// Record that the peer key was confirmed out of band.
    #[must_use]
    pub fn mark_verified(mut self) -> Self {
        self.trust = TrustLevel::Verified;
        self
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        *self.key == *other.key
    }
}

impl Eq for SharedSecret {}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("key", &"<redacted>")
            .field("trust", &self.trust)
            .finish()
    }
}

/// Derive the secret shared between `own` and `peer`.
///
/// `derive(a.private, b.public) == derive(b.private, a.public)` for any two
/// pairs.
pub fn derive(own: &PrivateKey, peer: &PublicKey) -> SharedSecret {
    let shared = ecdh::diffie_hellman(
        own.as_inner().to_nonzero_scalar(),
        peer.as_inner().as_affine(),
    );

    let mut key = [0u8; SHARED_SECRET_SIZE];
    key.copy_from_slice(shared.raw_secret_bytes());
    let secret = SharedSecret::from_bytes(key);
    zeroize::Zeroize::zeroize(&mut key);
    secret
}

/// Derive from encoded keys as stored locally and served by the directory.
///
/// # Errors
///
/// - `CryptoError::Agreement` if either key fails to decode; the session
///   cannot be established with this material
pub fn derive_encoded(
    own_private: &str,
    peer_public: &str,
) -> Result<SharedSecret, CryptoError> {
    let own = PrivateKey::from_encoded(own_private)
        .map_err(|e| CryptoError::Agreement { reason: e.to_string() })?;
    let peer = PublicKey::from_encoded(peer_public)
        .map_err(|e| CryptoError::Agreement { reason: e.to_string() })?;

    Ok(derive(&own, &peer))
}
