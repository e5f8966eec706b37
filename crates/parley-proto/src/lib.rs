//! Parley wire protocol
//!
//! Frames are a fixed 16-byte binary header followed by a CBOR payload. The
//! header carries the opcode and a request id so the server can dispatch and
//! clients can correlate replies without parsing the payload first.
//!
//! ```text
//! client                                   server
//!   │── RegisterUser {username, publicKey} ──▶│
//!   │◀──────────── UserRegistered {user} ─────│
//!   │── Register {userId} ───────────────────▶│  presence: online
//!   │◀──────────────────────────────── Ack ───│
//!   │── Send {receiverId, cipherText, iv} ───▶│  persist, then push
//!   │◀──────────────────── Sent {message} ────│
//!   │◀──── Deliver / StatusChanged (id 0) ────│  pushes
//! ```
//!
//! Identifiers are UUID strings, timestamps ISO-8601 strings, and key material,
//! ciphertext and iv are base64 strings.

#![forbid(unsafe_code)]

pub mod errors;
pub mod frame;
pub mod header;
pub mod ids;
pub mod opcode;
pub mod payloads;
pub mod records;

pub use errors::{ProtocolError, Result};
pub use frame::Frame;
pub use header::FrameHeader;
pub use ids::{MessageId, UserId};
pub use opcode::Opcode;
pub use payloads::{ErrorPayload, Payload, replies, requests};
pub use records::{
    EncryptedMessage, MAX_CIPHER_TEXT_LEN, MESSAGE_ENVELOPE_OVERHEAD, PresenceStatus,
    StoredMessage, UserSummary,
};

/// ALPN identifier negotiated during the QUIC handshake
pub const ALPN_PROTOCOL: &[u8] = b"parley";
