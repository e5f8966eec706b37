//! CBOR-encoded protocol messages.
//!
//! Headers are raw binary; payloads are CBOR with camelCase field names so the
//! same shapes work for browser clients. The opcode in the header decides the
//! payload type, so only the inner struct is serialized (no variant tag).
//!
//! # Invariants
//!
//! Each payload variant maps to exactly one opcode (enforced by match
//! exhaustiveness). Decoding an encoded payload with its own opcode yields an
//! equal value.

pub mod replies;
pub mod requests;

use bytes::BufMut;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Frame, FrameHeader, Opcode,
    errors::{ProtocolError, Result},
};

/// All possible frame payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    // Client requests
    /// Bind connection to identity
    Register(requests::Register),
    /// Submit ciphertext
    Send(requests::SendMessage),
    /// Create directory entry
    RegisterUser(requests::RegisterUser),
    /// Look up a public key
    LookupPublicKey(requests::LookupPublicKey),
    /// List the directory
    ListUsers,
    /// Fetch a conversation
    FetchHistory(requests::FetchHistory),

    // Server replies
    /// Generic success
    Ack,
    /// Message persisted
    Sent(replies::Sent),
    /// Directory entry created
    UserRegistered(replies::UserRegistered),
    /// Public key lookup result
    PublicKey(replies::PublicKeyReply),
    /// Directory listing
    UserList(replies::UserList),
    /// Conversation history
    History(replies::History),

    // Server pushes
    /// Presence change
    StatusChanged(replies::StatusChanged),
    /// Live message
    Deliver(replies::Deliver),

    /// Request failed
    Error(ErrorPayload),
}

/// Error payload for error frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code identifying the type of error.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorPayload {
    /// Payload does not match the opcode's shape, or the request is not one
    /// the server accepts.
    pub const INVALID_PAYLOAD: u16 = 0x0001;
    /// Key or ciphertext encoding is malformed.
    pub const DECODE: u16 = 0x0002;
    /// User, public key or conversation does not exist.
    pub const NOT_FOUND: u16 = 0x0003;
    /// Username already taken.
    pub const CONFLICT: u16 = 0x0004;
    /// Storage failed or timed out; the whole submit may be retried.
    pub const PERSISTENCE: u16 = 0x0005;
    /// Connection has not bound an identity with `Register`.
    pub const NOT_REGISTERED: u16 = 0x0006;

    /// Create an invalid payload error.
    pub fn invalid_payload(msg: impl Into<String>) -> Self {
        Self { code: Self::INVALID_PAYLOAD, message: msg.into() }
    }

    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        Self { code: Self::DECODE, message: msg.into() }
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { code: Self::NOT_FOUND, message: msg.into() }
    }

    /// Create a conflict error.
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self { code: Self::CONFLICT, message: msg.into() }
    }

    /// Create a persistence error.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self { code: Self::PERSISTENCE, message: msg.into() }
    }

    /// Create a not registered error.
    pub fn not_registered() -> Self {
        Self {
            code: Self::NOT_REGISTERED,
            message: "connection has not registered an identity".to_string(),
        }
    }

    /// Whether the client may retry the request unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code == Self::PERSISTENCE
    }
}

fn cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::CborDecode(e.to_string()))
}

impl Payload {
    /// Opcode corresponding to this payload type.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Register(_) => Opcode::Register,
            Self::Send(_) => Opcode::Send,
            Self::RegisterUser(_) => Opcode::RegisterUser,
            Self::LookupPublicKey(_) => Opcode::LookupPublicKey,
            Self::ListUsers => Opcode::ListUsers,
            Self::FetchHistory(_) => Opcode::FetchHistory,
            Self::Ack => Opcode::Ack,
            Self::Sent(_) => Opcode::Sent,
            Self::UserRegistered(_) => Opcode::UserRegistered,
            Self::PublicKey(_) => Opcode::PublicKey,
            Self::UserList(_) => Opcode::UserList,
            Self::History(_) => Opcode::History,
            Self::StatusChanged(_) => Opcode::StatusChanged,
            Self::Deliver(_) => Opcode::Deliver,
            Self::Error(_) => Opcode::Error,
        }
    }

    /// Encode payload to buffer.
    ///
    /// Serializes only the inner struct. Size limits are enforced later by
    /// [`Frame::encode`].
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let mut writer = dst.writer();

        match self {
            Self::ListUsers | Self::Ack => Ok(()), // Zero-byte payloads
            Self::Register(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Send(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::RegisterUser(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::LookupPublicKey(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::FetchHistory(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Sent(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserRegistered(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::PublicKey(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::UserList(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::History(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::StatusChanged(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Deliver(inner) => ciborium::ser::into_writer(inner, &mut writer),
            Self::Error(inner) => ciborium::ser::into_writer(inner, &mut writer),
        }
        .map_err(|e| ProtocolError::CborEncode(e.to_string()))
    }

    /// Decode payload bytes according to `opcode`.
    ///
    /// The size check runs before CBOR parsing so oversized input never
    /// reaches the parser.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::PayloadTooLarge` if bytes exceed 1 MiB
    /// - `ProtocolError::CborDecode` if the bytes do not match the opcode's
    ///   shape
    pub fn decode(opcode: Opcode, bytes: &[u8]) -> Result<Self> {
        if bytes.len() > FrameHeader::MAX_PAYLOAD_SIZE as usize {
            return Err(ProtocolError::PayloadTooLarge {
                size: bytes.len(),
                max: FrameHeader::MAX_PAYLOAD_SIZE as usize,
            });
        }

        let payload = match opcode {
            Opcode::ListUsers => Self::ListUsers,
            Opcode::Ack => Self::Ack,
            Opcode::Register => Self::Register(cbor(bytes)?),
            Opcode::Send => Self::Send(cbor(bytes)?),
            Opcode::RegisterUser => Self::RegisterUser(cbor(bytes)?),
            Opcode::LookupPublicKey => Self::LookupPublicKey(cbor(bytes)?),
            Opcode::FetchHistory => Self::FetchHistory(cbor(bytes)?),
            Opcode::Sent => Self::Sent(cbor(bytes)?),
            Opcode::UserRegistered => Self::UserRegistered(cbor(bytes)?),
            Opcode::PublicKey => Self::PublicKey(cbor(bytes)?),
            Opcode::UserList => Self::UserList(cbor(bytes)?),
            Opcode::History => Self::History(cbor(bytes)?),
            Opcode::StatusChanged => Self::StatusChanged(cbor(bytes)?),
            Opcode::Deliver => Self::Deliver(cbor(bytes)?),
            Opcode::Error => Self::Error(cbor(bytes)?),
        };

        Ok(payload)
    }

    /// Convert payload into a transport frame tagged with `request_id`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::CborEncode` if serialization fails
    pub fn into_frame(self, request_id: u32) -> Result<Frame> {
        let mut buf = Vec::new();
        self.encode(&mut buf)?;

        let mut header = FrameHeader::new(self.opcode());
        header.set_request_id(request_id);
        Ok(Frame::new(header, buf))
    }

    /// Parse payload from a raw transport frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownOpcode` if the header opcode is unassigned
    /// - Any error from [`Payload::decode`]
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let opcode = frame
            .opcode()
            .ok_or_else(|| ProtocolError::UnknownOpcode(frame.header.opcode()))?;
        Self::decode(opcode, &frame.payload)
    }
}
