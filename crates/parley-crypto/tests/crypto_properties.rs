//! Property-based tests for agreement and encryption
//!
//! 1. **Commutativity**: both peers derive the same secret
//! 2. **Round-trip**: decrypt(encrypt(m)) == m for any plaintext
//! 3. **Tamper evidence**: any single-bit flip in ciphertext or iv is rejected
//! 4. **Key isolation**: a secret derived by a third party cannot decrypt

use parley_crypto::{
    CryptoError, IV_SIZE, KeyPair, SHARED_SECRET_SIZE, SharedSecret, decrypt, decrypt_bytes,
    derive, encoding, encrypt, encrypt_with_iv,
};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_agreement_is_commutative(_round in 0u8..32) {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();

        prop_assert_eq!(
            derive(alice.private_key(), bob.public_key()),
            derive(bob.private_key(), alice.public_key())
        );
    }

    #[test]
    fn prop_third_party_cannot_read(plaintext in prop::collection::vec(any::<u8>(), 0..256)) {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let eve = KeyPair::generate().unwrap();

        let ab = derive(alice.private_key(), bob.public_key());
        let eve_guess = derive(eve.private_key(), bob.public_key());

        let sealed = encrypt(&plaintext, &ab).unwrap();
        prop_assert_eq!(decrypt(&sealed.cipher_text, &sealed.iv, &eve_guess), Err(CryptoError::Decrypt));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_encrypt_decrypt_roundtrip(
        plaintext in prop::collection::vec(any::<u8>(), 0..2048),
        key in any::<[u8; SHARED_SECRET_SIZE]>(),
    ) {
        let key = SharedSecret::from_bytes(key);
        let sealed = encrypt(&plaintext, &key).unwrap();

        prop_assert_eq!(decrypt(&sealed.cipher_text, &sealed.iv, &key).unwrap(), plaintext);
    }

    #[test]
    fn prop_unicode_text_roundtrip(text in "\\PC{0,200}") {
        let key = SharedSecret::from_bytes([3; SHARED_SECRET_SIZE]);
        let sealed = encrypt(text.as_bytes(), &key).unwrap();
        let opened = decrypt(&sealed.cipher_text, &sealed.iv, &key).unwrap();

        prop_assert_eq!(String::from_utf8(opened).unwrap(), text);
    }

    #[test]
    fn prop_ciphertext_bit_flip_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        iv in any::<[u8; IV_SIZE]>(),
        flip in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let key = SharedSecret::from_bytes([9; SHARED_SECRET_SIZE]);
        let sealed = encrypt_with_iv(&plaintext, &key, iv);

        let mut ciphertext = encoding::decode(&sealed.cipher_text).unwrap();
        let at = flip.index(ciphertext.len());
        ciphertext[at] ^= 1 << bit;

        prop_assert_eq!(decrypt_bytes(&ciphertext, &iv, &key), Err(CryptoError::Decrypt));
    }

    #[test]
    fn prop_iv_bit_flip_rejected(
        plaintext in prop::collection::vec(any::<u8>(), 0..256),
        iv in any::<[u8; IV_SIZE]>(),
        flip in 0..IV_SIZE,
        bit in 0u8..8,
    ) {
        let key = SharedSecret::from_bytes([9; SHARED_SECRET_SIZE]);
        let sealed = encrypt_with_iv(&plaintext, &key, iv);
        let ciphertext = encoding::decode(&sealed.cipher_text).unwrap();

        let mut tampered = iv;
        tampered[flip] ^= 1 << bit;

        prop_assert_eq!(decrypt_bytes(&ciphertext, &tampered, &key), Err(CryptoError::Decrypt));
    }
}

#[test]
fn ivs_are_unique_across_many_messages() {
    let key = SharedSecret::from_bytes([1; SHARED_SECRET_SIZE]);
    let mut seen = std::collections::HashSet::new();

    for _ in 0..1000 {
        let sealed = encrypt(b"same", &key).unwrap();
        assert!(seen.insert(sealed.iv), "iv reused");
    }
}
