//! Message encryption using AES-256-GCM.
//!
//! Ciphertext carries the 16-byte tag appended, and both ciphertext and iv are
//! base64 so they can sit in text payloads and database columns unchanged.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use rand_core::{OsRng, RngCore};

use crate::{agreement::SharedSecret, encoding, error::CryptoError};

/// AES-GCM iv size (12 bytes)
pub const IV_SIZE: usize = 12;

/// GCM tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

/// Encrypted message in transport encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Base64 ciphertext with the authentication tag appended
    pub cipher_text: String,
    /// Base64 12-byte iv
    pub iv: String,
}

/// Encrypt `plaintext` under `key` with a fresh random iv.
///
/// # Errors
///
/// - `CryptoError::Entropy` if the OS RNG fails
pub fn encrypt(plaintext: &[u8], key: &SharedSecret) -> Result<Sealed, CryptoError> {
    let mut iv = [0u8; IV_SIZE];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CryptoError::Entropy { reason: e.to_string() })?;

    Ok(encrypt_with_iv(plaintext, key, iv))
}

/// Encrypt with a caller-provided iv.
///
/// Reusing an iv under the same key breaks confidentiality of both messages;
/// production callers go through [`encrypt`].
pub fn encrypt_with_iv(plaintext: &[u8], key: &SharedSecret, iv: [u8; IV_SIZE]) -> Sealed {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let Ok(ciphertext) = cipher.encrypt(Nonce::from_slice(&iv), plaintext) else {
        unreachable!("AES-GCM encryption cannot fail below the 64 GiB plaintext limit");
    };

    Sealed { cipher_text: encoding::encode(&ciphertext), iv: encoding::encode(&iv) }
}

/// Decrypt base64 ciphertext and iv.
///
/// # Errors
///
/// - `CryptoError::Decode` if either field is not base64
/// - `CryptoError::Decrypt` if the iv has the wrong length, or the tag does
///   not verify (wrong key, modified ciphertext or iv)
pub fn decrypt(cipher_text: &str, iv: &str, key: &SharedSecret) -> Result<Vec<u8>, CryptoError> {
    let ciphertext = encoding::decode(cipher_text)?;
    let iv = encoding::decode(iv)?;

    decrypt_bytes(&ciphertext, &iv, key)
}

/// Decrypt raw ciphertext and iv.
///
/// # Errors
///
/// - `CryptoError::Decrypt` on a wrong-length iv or a failed tag check
pub fn decrypt_bytes(
    ciphertext: &[u8],
    iv: &[u8],
    key: &SharedSecret,
) -> Result<Vec<u8>, CryptoError> {
    if iv.len() != IV_SIZE || ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decrypt);
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher.decrypt(Nonce::from_slice(iv), ciphertext).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::SHARED_SECRET_SIZE;

    fn key(byte: u8) -> SharedSecret {
        SharedSecret::from_bytes([byte; SHARED_SECRET_SIZE])
    }

    #[test]
    fn round_trip() {
        let k = key(1);
        let sealed = encrypt(b"hello bob", &k).unwrap();
        assert_eq!(decrypt(&sealed.cipher_text, &sealed.iv, &k).unwrap(), b"hello bob");
    }

    #[test]
    fn empty_plaintext_is_tag_only() {
        let k = key(1);
        let sealed = encrypt_with_iv(b"", &k, [0; IV_SIZE]);
        assert_eq!(encoding::decode(&sealed.cipher_text).unwrap().len(), TAG_SIZE);
        assert_eq!(decrypt(&sealed.cipher_text, &sealed.iv, &k).unwrap(), b"");
    }

    #[test]
    fn same_plaintext_encrypts_differently() {
        let k = key(1);
        let a = encrypt(b"hi", &k).unwrap();
        let b = encrypt(b"hi", &k).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.cipher_text, b.cipher_text);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = encrypt(b"secret", &key(1)).unwrap();
        let result = decrypt(&sealed.cipher_text, &sealed.iv, &key(2));
        assert_eq!(result, Err(CryptoError::Decrypt));
    }

    #[test]
    fn truncated_iv_fails() {
        let k = key(1);
        let sealed = encrypt(b"secret", &k).unwrap();
        let short_iv = encoding::encode(&[0u8; 8]);
        assert_eq!(decrypt(&sealed.cipher_text, &short_iv, &k), Err(CryptoError::Decrypt));
    }

    #[test]
    fn short_ciphertext_fails() {
        let k = key(1);
        assert_eq!(decrypt_bytes(&[0u8; 4], &[0u8; IV_SIZE], &k), Err(CryptoError::Decrypt));
    }

    #[test]
    fn malformed_base64_is_decode_error() {
        let k = key(1);
        let sealed = encrypt(b"secret", &k).unwrap();
        assert!(matches!(decrypt("***", &sealed.iv, &k), Err(CryptoError::Decode { .. })));
    }
}
