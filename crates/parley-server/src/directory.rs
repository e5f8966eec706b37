//! User directory service: registration, public key lookup, listing.
//!
//! Public keys are validated as P-256 SPKI before they are stored, so every
//! key a client fetches will at least import. The `online` flag in listings
//! comes from the presence registry at request time.

use std::sync::Arc;

use parley_crypto::PublicKey;
use parley_proto::{UserId, UserSummary};
use thiserror::Error;

use crate::{
    env::Environment,
    registry::PresenceRegistry,
    relay::RelayConfig,
    storage::{Directory, StorageError, UserRecord, with_deadline},
    transport::LiveTransport,
};

/// Why a directory request failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// Required field missing or blank.
    #[error("invalid request: {reason}")]
    Invalid {
        /// What was missing
        reason: String,
    },

    /// Public key is not a base64 P-256 SPKI key.
    #[error("malformed public key: {reason}")]
    Decode {
        /// Decoder message
        reason: String,
    },

    /// Username already registered.
    #[error("username already taken: {username}")]
    Conflict {
        /// The contested username
        username: String,
    },

    /// No such user.
    #[error("unknown user: {user_id}")]
    NotFound {
        /// Missing user
        user_id: UserId,
    },

    /// Storage failed or timed out.
    #[error("persistence failed: {0}")]
    Persistence(#[source] StorageError),
}

impl From<StorageError> for DirectoryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { user_id } => Self::NotFound { user_id },
            StorageError::Conflict { username } => Self::Conflict { username },
            other => Self::Persistence(other),
        }
    }
}

/// Directory operations over a [`Directory`] backend.
pub struct DirectoryService<D, T, E> {
    directory: D,
    registry: Arc<PresenceRegistry<T>>,
    env: E,
    config: RelayConfig,
}

impl<D, T, E> DirectoryService<D, T, E>
where
    D: Directory,
    T: LiveTransport,
    E: Environment,
{
    /// Service over `directory`, reading presence from `registry`.
    pub fn new(
        directory: D,
        registry: Arc<PresenceRegistry<T>>,
        env: E,
        config: RelayConfig,
    ) -> Self {
        Self { directory, registry, env, config }
    }

    /// Create a user with a fresh random id.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::Invalid` if the username is blank
    /// - `DirectoryError::Decode` if the public key does not import
    /// - `DirectoryError::Conflict` if the username is taken
    /// - `DirectoryError::Persistence` if storage failed
    pub async fn register_user(
        &self,
        username: &str,
        public_key: &str,
    ) -> Result<UserSummary, DirectoryError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(DirectoryError::Invalid { reason: "username is required".to_string() });
        }

        let key = PublicKey::from_encoded(public_key)
            .map_err(|e| DirectoryError::Decode { reason: e.to_string() })?;

        let record = UserRecord {
            user_id: self.env.new_user_id(),
            username: username.to_string(),
            public_key: key.to_encoded(),
        };

        let directory = self.directory.clone();
        let stored = record.clone();
        with_deadline(self.config.storage_timeout, move || directory.register_user(stored)).await?;

        tracing::info!(user = %record.user_id, fingerprint = %key.fingerprint(), "user registered");

        Ok(record.to_summary(self.registry.is_online(record.user_id)))
    }

    /// Base64 SPKI public key of `user_id`.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::NotFound` if the user never registered
    /// - `DirectoryError::Persistence` if storage failed
    pub async fn public_key(&self, user_id: UserId) -> Result<String, DirectoryError> {
        let directory = self.directory.clone();
        let record =
            with_deadline(self.config.storage_timeout, move || directory.user(user_id)).await?;
        Ok(record.public_key)
    }

    /// Whether `user_id` is registered.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::Persistence` if storage failed
    pub async fn exists(&self, user_id: UserId) -> Result<bool, DirectoryError> {
        match self.public_key(user_id).await {
            Ok(_) => Ok(true),
            Err(DirectoryError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every user ordered by username, with live presence.
    ///
    /// # Errors
    ///
    /// - `DirectoryError::Persistence` if storage failed
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, DirectoryError> {
        let directory = self.directory.clone();
        let records =
            with_deadline(self.config.storage_timeout, move || directory.list_users()).await?;

        Ok(records
            .iter()
            .map(|record| record.to_summary(self.registry.is_online(record.user_id)))
            .collect())
    }
}
