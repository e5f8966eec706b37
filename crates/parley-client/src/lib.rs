//! Parley client
//!
//! Everything a device needs to talk end-to-end encrypted through a Parley
//! relay: its own identity, the per-peer session keys, and (optionally) the
//! QUIC connection.
//!
//! # Session bootstrap
//!
//! ```text
//! open(peer)
//!   ├── LocalKeyStore::load      → own private key   (NotAuthenticated if absent)
//!   ├── KeyDirectory::lookup     → peer public key   (PeerKeyNotFound if absent)
//!   ├── derive(own, peer)        → SharedSecret      (Crypto/Agreement on bad key)
//!   └── cache by peer            → Session: seal / open / open_history
//! ```
//!
//! Sessions are cached until [`SessionManager::forget`] is called. A peer that
//! re-keys on the server is not noticed; forget and reopen to pick up the new
//! key.
//!
//! # Transport (optional)
//!
//! With the `transport` feature enabled, this crate also provides:
//! - [`transport::ConnectedClient`]: request/reply and pushes over QUIC
//! - [`transport::connect`]: connect to a relay

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod directory;
mod enroll;
mod error;
mod keystore;
mod session;

#[cfg(feature = "transport")]
pub mod transport;

pub use directory::KeyDirectory;
pub use enroll::enroll;
pub use error::ClientError;
pub use keystore::{FileKeyStore, LocalIdentity, LocalKeyStore, MemoryKeyStore};
pub use session::{HistoryEntry, Session, SessionManager};
