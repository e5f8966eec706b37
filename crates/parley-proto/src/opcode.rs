//! Operation codes carried in the frame header.
//!
//! Client requests live in `0x00xx`, server replies and pushes in `0x01xx`.
//! The opcode alone decides how the payload is decoded.

/// Every frame type on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Opcode {
    /// Bind this connection to a user identity
    Register = 0x0001,
    /// Submit an encrypted message for relay
    Send = 0x0002,
    /// Create a directory entry with a public key
    RegisterUser = 0x0010,
    /// Fetch one user's public key
    LookupPublicKey = 0x0011,
    /// Fetch every registered user
    ListUsers = 0x0012,
    /// Fetch the conversation between two users
    FetchHistory = 0x0013,

    /// Generic success reply
    Ack = 0x0101,
    /// Message persisted
    Sent = 0x0102,
    /// Directory entry created
    UserRegistered = 0x0110,
    /// Public key lookup result
    PublicKey = 0x0111,
    /// User listing
    UserList = 0x0112,
    /// Conversation history
    History = 0x0113,
    /// Presence change push
    StatusChanged = 0x0120,
    /// Live message push
    Deliver = 0x0121,
    /// Request failed
    Error = 0x01FF,
}

impl Opcode {
    /// Every assigned opcode.
    pub const ALL: [Self; 15] = [
        Self::Register,
        Self::Send,
        Self::RegisterUser,
        Self::LookupPublicKey,
        Self::ListUsers,
        Self::FetchHistory,
        Self::Ack,
        Self::Sent,
        Self::UserRegistered,
        Self::PublicKey,
        Self::UserList,
        Self::History,
        Self::StatusChanged,
        Self::Deliver,
        Self::Error,
    ];

    /// Wire value.
    #[must_use]
    pub const fn to_u16(self) -> u16 {
        self as u16
    }

    /// Parse a wire value. `None` if unassigned.
    #[must_use]
    pub const fn from_u16(value: u16) -> Option<Self> {
        let opcode = match value {
            0x0001 => Self::Register,
            0x0002 => Self::Send,
            0x0010 => Self::RegisterUser,
            0x0011 => Self::LookupPublicKey,
            0x0012 => Self::ListUsers,
            0x0013 => Self::FetchHistory,
            0x0101 => Self::Ack,
            0x0102 => Self::Sent,
            0x0110 => Self::UserRegistered,
            0x0111 => Self::PublicKey,
            0x0112 => Self::UserList,
            0x0113 => Self::History,
            0x0120 => Self::StatusChanged,
            0x0121 => Self::Deliver,
            0x01FF => Self::Error,
            _ => return None,
        };
        Some(opcode)
    }

    /// Whether clients send this opcode.
    #[must_use]
    pub const fn is_request(self) -> bool {
        (self as u16) < 0x0100
    }

    /// Whether the server sends this opcode unsolicited (request id 0).
    #[must_use]
    pub const fn is_push(self) -> bool {
        matches!(self, Self::StatusChanged | Self::Deliver)
    }
}
