//! Fuzz target for message decryption
//!
//! Ciphertext and iv arrive from other users through the relay, so they are
//! attacker-controlled.
//!
//! # Invariants
//!
//! - Arbitrary base64-ish strings never panic `decrypt`
//! - Any tampering with a genuine ciphertext or iv fails authentication
//! - Untampered messages always decrypt

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_crypto::{encoding, CryptoError, SharedSecret, IV_SIZE};

#[derive(Debug, Clone, Arbitrary)]
enum DecryptInput {
    Raw { cipher_text: String, iv: String },
    Tampered {
        plaintext: Vec<u8>,
        iv: [u8; IV_SIZE],
        flips: Vec<(u16, u8)>,
        iv_flip: Option<(u8, u8)>,
    },
}

fuzz_target!(|input: DecryptInput| {
    let key = SharedSecret::from_bytes([0x42; 32]);

    match input {
        DecryptInput::Raw { cipher_text, iv } => {
            let _ = parley_crypto::decrypt(&cipher_text, &iv, &key);
        }

        DecryptInput::Tampered { plaintext, iv, flips, iv_flip } => {
            let sealed = parley_crypto::encrypt_with_iv(&plaintext, &key, iv);
            let mut body = encoding::decode(&sealed.cipher_text).expect("own encoding decodes");
            let mut iv_bytes = iv;

            let mut tampered = false;
            for (pos, mask) in flips {
                if mask == 0 {
                    continue;
                }
                let idx = usize::from(pos) % body.len();
                body[idx] ^= mask;
                tampered = true;
            }
            if let Some((pos, mask)) = iv_flip {
                if mask != 0 {
                    iv_bytes[usize::from(pos) % IV_SIZE] ^= mask;
                    tampered = true;
                }
            }

            let result = parley_crypto::decrypt(
                &encoding::encode(&body),
                &encoding::encode(&iv_bytes),
                &key,
            );

            // Two flips can cancel out.
            let unchanged = encoding::encode(&body) == sealed.cipher_text && iv_bytes == iv;
            if tampered && !unchanged {
                assert_eq!(result, Err(CryptoError::Decrypt));
            } else {
                assert_eq!(result.expect("untampered decrypts"), plaintext);
            }
        }
    }
});
