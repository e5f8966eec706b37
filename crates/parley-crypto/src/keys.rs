//! P-256 key pairs and their transport encodings.
//!
//! Public keys travel as base64 DER `SubjectPublicKeyInfo`; private keys are
//! stored by the owning device as base64 DER PKCS#8. Both encodings are
//! self-describing, so importing a key of another algorithm or curve fails at
//! decode time rather than during agreement.

use std::fmt;

use p256::{
    SecretKey,
    pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey},
};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    encoding,
    error::{CryptoError, KeyKind},
};

/// Scalars outside the curve order are rejected; each attempt fails with
/// probability ~2^-32, so a handful of retries is plenty.
const MAX_GENERATION_ATTEMPTS: usize = 8;

/// Public half of a key pair.
///
/// Safe to publish. Usable only for export and as the peer input to
/// [`crate::derive`].
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Encode as base64 DER `SubjectPublicKeyInfo`.
    pub fn to_encoded(&self) -> String {
        encoding::encode(self.to_der().as_slice())
    }

    /// Decode a base64 DER `SubjectPublicKeyInfo`.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Decode` if the string is not base64, or the DER is not
    ///   an EC public key on P-256
    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        let der = encoding::decode(encoded)?;
        p256::PublicKey::from_public_key_der(&der)
            .map(Self)
            .map_err(|e| CryptoError::invalid_key(KeyKind::Public, e))
    }

    /// SHA-256 over the SPKI encoding, as lowercase hex.
    ///
    /// Two parties comparing fingerprints out of band can detect a
    /// substituted public key.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.to_der()))
    }

    pub(crate) fn as_inner(&self) -> &p256::PublicKey {
        &self.0
    }

    fn to_der(&self) -> Vec<u8> {
        let Ok(document) = self.0.to_public_key_der() else {
            unreachable!("SPKI encoding of a valid P-256 point cannot fail");
        };
        document.into_vec()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

/// Private half of a key pair.
///
/// Owned by exactly one device and never sent over the network. The encoded
/// form is the only durable copy; losing it makes every conversation that used
/// this pair unreadable. Zeroized on drop.
#[derive(Clone)]
pub struct PrivateKey(SecretKey);

impl PrivateKey {
    /// Encode as base64 DER PKCS#8.
    ///
    /// The returned string is the secret itself; callers should hold it in
    /// zeroizing storage.
    pub fn to_encoded(&self) -> Zeroizing<String> {
        let Ok(document) = self.0.to_pkcs8_der() else {
            unreachable!("PKCS#8 encoding of a valid P-256 scalar cannot fail");
        };
        Zeroizing::new(encoding::encode(document.as_bytes()))
    }

    /// Decode a base64 DER PKCS#8 private key.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Decode` if the string is not base64, or the DER is not
    ///   an EC private key on P-256
    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        let der = Zeroizing::new(encoding::decode(encoded)?);
        SecretKey::from_pkcs8_der(&der)
            .map(Self)
            .map_err(|e| CryptoError::invalid_key(KeyKind::Private, e))
    }

    /// Matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }

    pub(crate) fn as_inner(&self) -> &SecretKey {
        &self.0
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(<redacted>)")
    }
}

/// Key pair for ECDH agreement on P-256.
///
/// Created once per identity at registration.
#[derive(Debug, Clone)]
pub struct KeyPair {
    public: PublicKey,
    private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS RNG.
    ///
    /// # Errors
    ///
    /// - `CryptoError::Entropy` if the OS RNG fails. Not worth retrying.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = Zeroizing::new([0u8; 32]);

        for _ in 0..MAX_GENERATION_ATTEMPTS {
            OsRng
                .try_fill_bytes(&mut seed[..])
                .map_err(|e| CryptoError::Entropy { reason: e.to_string() })?;

            if let Ok(secret) = SecretKey::from_slice(&seed[..]) {
                return Ok(Self::from_private(PrivateKey(secret)));
            }
        }

        Err(CryptoError::Entropy { reason: "no valid scalar produced".to_string() })
    }

    /// Rebuild a pair from a stored private key.
    pub fn from_private(private: PrivateKey) -> Self {
        Self { public: private.public_key(), private }
    }

    /// Public half.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// Private half.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// Split into (public, private).
    pub fn into_parts(self) -> (PublicKey, PrivateKey) {
        (self.public, self.private)
    }
}
