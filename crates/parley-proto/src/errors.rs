//! Protocol error types

use thiserror::Error;

/// Result alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from framing and payload (de)serialization
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Buffer shorter than a frame header
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Required length
        expected: usize,
        /// Available length
        actual: usize,
    },

    /// Payload shorter than the header claims
    #[error("frame truncated: header claims {expected} payload bytes, got {actual}")]
    FrameTruncated {
        /// Claimed payload length
        expected: usize,
        /// Available payload length
        actual: usize,
    },

    /// Magic bytes do not spell "PRLY"
    #[error("invalid magic number")]
    InvalidMagic,

    /// Version byte not supported by this build
    #[error("unsupported protocol version {0:#04x}")]
    UnsupportedVersion(u8),

    /// Payload exceeds the protocol limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual size
        size: usize,
        /// Protocol limit
        max: usize,
    },

    /// Opcode not assigned in this protocol version
    #[error("unknown opcode {0:#06x}")]
    UnknownOpcode(u16),

    /// Payload could not be serialized
    #[error("CBOR encode failed: {0}")]
    CborEncode(String),

    /// Payload bytes do not match the shape for the opcode
    #[error("CBOR decode failed: {0}")]
    CborDecode(String),
}
