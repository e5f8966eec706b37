//! Fixed vectors produced by an independent P-256 / AES-GCM implementation
//!
//! Keys are SPKI and PKCS#8 exports; the secret is the raw ECDH x-coordinate
//! and the ciphertext is AES-256-GCM with the tag appended, exactly what a
//! browser client produces.

use parley_crypto::{PrivateKey, PublicKey, decrypt, derive, derive_encoded, encrypt_with_iv};

const ALICE_PUBLIC: &str = "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAEgDQeLo2USQVx6p4mwxLH3eGSKcDBb4368LzD6fywCZ+RZQtDyEJCDVgxumobBm/SEbQ4Ozi0QarXPBi9yR5hWg==";
const ALICE_PRIVATE: &str = "MIGHAgEAMBMGByqGSM49AgEGCCqGSM49AwEHBG0wawIBAQQgZ2erlN74qWj7XSAPvKDWDSTz6txXRuQK6xyrDuC00tOhRANCAASANB4ujZRJBXHqnibDEsfd4ZIpwMFvjfrwvMPp/LAJn5FlC0PIQkINWDG6ahsGb9IRtDg7OLRBqtc8GL3JHmFa";
const BOB_PUBLIC: &str = "MFkwEwYHKoZIzj0CAQYIKoZIzj0DAQcDQgAETOnjZ5PjuAfRsPwF6AWAouU4PhAvqXc+yfQEqeaQIrkfeXtmSAOCjodKC4IOQkaI96SnJ6lpE3y7qWAXVRjqWg==";
const BOB_PRIVATE: &str = "MIGHAgEAMBMGByqGSM49AgEGCCqGSM49AwEHBG0wawIBAQQg6t58q262tkQCkyBZuN9NgNe0r9mhon2YisGEHKMnPlyhRANCAARM6eNnk+O4B9Gw/AXoBYCi5Tg+EC+pdz7J9ASp5pAiuR95e2ZIA4KOh0oLgg5CRoj3pKcnqWkTfLupYBdVGOpa";

const SHARED_HEX: &str = "55a4879aeec3f876478bbcce9517af1fae11cff09790437d7a47efd887eb2790";
const IV: &str = "AAECAwQFBgcICQoL";
const CIPHER_TEXT: &str = "apVM3Fiqx0hGW7YcObIBadwDOBb1+1U1XbY//K3r";
const PLAINTEXT: &str = "merhaba dünya";

#[test]
fn derives_reference_secret() {
    let secret = derive_encoded(ALICE_PRIVATE, BOB_PUBLIC).unwrap();
    assert_eq!(hex::encode(secret.as_bytes()), SHARED_HEX);

    let reverse = derive_encoded(BOB_PRIVATE, ALICE_PUBLIC).unwrap();
    assert_eq!(secret, reverse);
}

#[test]
fn decrypts_reference_ciphertext() {
    let alice = PrivateKey::from_encoded(ALICE_PRIVATE).unwrap();
    let bob = PublicKey::from_encoded(BOB_PUBLIC).unwrap();
    let secret = derive(&alice, &bob);

    let plaintext = decrypt(CIPHER_TEXT, IV, &secret).unwrap();
    assert_eq!(String::from_utf8(plaintext).unwrap(), PLAINTEXT);
}

#[test]
fn encrypts_to_reference_ciphertext() {
    let secret = derive_encoded(BOB_PRIVATE, ALICE_PUBLIC).unwrap();
    let iv: [u8; 12] = std::array::from_fn(|i| i as u8);

    let sealed = encrypt_with_iv(PLAINTEXT.as_bytes(), &secret, iv);
    assert_eq!(sealed.iv, IV);
    assert_eq!(sealed.cipher_text, CIPHER_TEXT);
}
