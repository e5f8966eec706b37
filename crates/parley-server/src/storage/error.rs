//! Storage error types.
//!
//! - `NotFound`: requested user doesn't exist
//! - `Conflict`: username already taken
//! - `Serialization`: failed to encode/decode a stored record
//! - `Io`: underlying storage system errors
//! - `Timeout`: the call did not finish within the configured deadline

use std::time::Duration;

use parley_proto::UserId;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// User not found
    #[error("user not found: {user_id}")]
    NotFound {
        /// User that was looked up
        user_id: UserId,
    },

    /// Username already registered
    #[error("username already taken: {username}")]
    Conflict {
        /// The contested username
        username: String,
    },

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Storage call exceeded its deadline
    #[error("storage call timed out after {0:?}")]
    Timeout(Duration),
}

impl StorageError {
    /// Whether the same call may succeed if repeated.
    ///
    /// I/O failures and timeouts are transient; missing users, conflicts and
    /// corrupt records are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Timeout(_))
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(StorageError::Io("disk".into()).is_retryable());
        assert!(StorageError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!StorageError::Conflict { username: "alice".into() }.is_retryable());
        assert!(!StorageError::Serialization("bad".into()).is_retryable());
    }
}
