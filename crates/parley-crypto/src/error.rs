//! Error types for key handling, agreement and message encryption

use thiserror::Error;

/// What kind of key material failed to decode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// SPKI-encoded public key
    Public,
    /// PKCS#8-encoded private key
    Private,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => f.write_str("public key"),
            Self::Private => f.write_str("private key"),
        }
    }
}

/// Errors from cryptographic operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Input is not a valid transport encoding, or not a valid key of the
    /// expected algorithm and curve
    #[error("decode error: {reason}")]
    Decode {
        /// What could not be decoded
        reason: String,
    },

    /// A key could not take part in agreement (malformed or wrong curve)
    #[error("cannot establish secure session: {reason}")]
    Agreement {
        /// Why agreement was refused
        reason: String,
    },

    /// Authentication tag did not verify (wrong key, corruption, tampering)
    #[error("message unreadable: authentication failed")]
    Decrypt,

    /// The platform RNG failed
    #[error("entropy source failure: {reason}")]
    Entropy {
        /// Error reported by the RNG
        reason: String,
    },
}

impl CryptoError {
    pub(crate) fn invalid_key(kind: KeyKind, reason: impl std::fmt::Display) -> Self {
        Self::Decode { reason: format!("invalid {kind}: {reason}") }
    }

    /// Always false: retrying a cryptographic operation with identical inputs
    /// reproduces the same failure.
    ///
    /// The remedy for [`CryptoError::Decrypt`] is re-deriving the session key,
    /// not retrying.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
