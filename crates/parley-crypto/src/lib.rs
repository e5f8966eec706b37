//! Parley Cryptographic Primitives
//!
//! Key pairs, pairwise key agreement and message encryption for one-to-one
//! end-to-end encrypted chat. The server never sees a private key or a shared
//! secret; it stores and forwards only what [`encrypt`] produces.
//!
//! # Key Lifecycle
//!
//! ```text
//! KeyPair::generate (once per identity, at registration)
//!        │
//!        ├── PublicKey  → base64 SPKI → published to the directory
//!        └── PrivateKey → base64 PKCS#8 → kept on the owning device
//!
//! derive(own private, peer public)
//!        │
//!        ▼
//! SharedSecret (32 bytes, same for both peers)
//!        │
//!        ▼
//! AES-256-GCM, fresh 12-byte iv per message → Sealed { cipher_text, iv }
//! ```
//!
//! # Security
//!
//! Confidentiality and integrity:
//! - Only the two holders of the matching private keys can derive the secret
//! - The GCM tag rejects any modification of ciphertext or iv
//! - A fresh random iv per message; never reused under one secret
//!
//! Not provided:
//! - Forward secrecy: a leaked private key exposes every past conversation
//!   it took part in
//! - Peer authentication: the directory is trusted to return the right public
//!   key. Fingerprints ([`PublicKey::fingerprint`]) allow manual comparison
//!   and [`TrustLevel`] records the outcome

#![forbid(unsafe_code)]

pub mod agreement;
pub mod cipher;
pub mod encoding;
pub mod error;
pub mod keys;

pub use agreement::{SHARED_SECRET_SIZE, SharedSecret, TrustLevel, derive, derive_encoded};
pub use cipher::{IV_SIZE, Sealed, TAG_SIZE, decrypt, decrypt_bytes, encrypt, encrypt_with_iv};
pub use error::{CryptoError, KeyKind};
pub use keys::{KeyPair, PrivateKey, PublicKey};
