//! Client error types.

use parley_crypto::CryptoError;
use parley_proto::{ErrorPayload, ProtocolError, UserId};
use thiserror::Error;

/// Errors surfaced to the application.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No local identity: the device never enrolled or was logged out.
    #[error("not authenticated: no local identity")]
    NotAuthenticated,

    /// The peer never registered a public key.
    #[error("no public key registered for {peer}")]
    PeerKeyNotFound {
        /// Peer that was looked up
        peer: UserId,
    },

    /// Key, agreement or decryption failure. Never retried.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// Local identity could not be read or written.
    #[error("local key storage failed: {0}")]
    Storage(String),

    /// A frame could not be built or parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The relay answered with an error.
    #[error("server error {}: {}", .0.code, .0.message)]
    Server(ErrorPayload),
}

impl ClientError {
    /// Whether the whole operation may be repeated.
    ///
    /// Transport failures and server-side persistence failures are transient.
    /// A retried send must re-encrypt the plaintext.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server(payload) => payload.is_retryable(),
            Self::NotAuthenticated
            | Self::PeerKeyNotFound { .. }
            | Self::Crypto(_)
            | Self::Protocol(_)
            | Self::Storage(_) => false,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy() {
        assert!(ClientError::Transport("reset".into()).is_retryable());
        assert!(ClientError::Server(ErrorPayload::persistence("disk")).is_retryable());
        assert!(!ClientError::Server(ErrorPayload::conflict("taken")).is_retryable());
        assert!(!ClientError::Crypto(CryptoError::Decrypt).is_retryable());
        assert!(!ClientError::NotAuthenticated.is_retryable());
    }
}
