//! Seam to the relay's user directory.

use async_trait::async_trait;
use parley_proto::{UserId, UserSummary};

use crate::ClientError;

/// Directory operations a client needs.
///
/// Implemented by [`crate::transport::ConnectedClient`] (feature `transport`)
/// and by test doubles.
#[async_trait]
pub trait KeyDirectory: Send + Sync {
    /// Register `username` with `public_key` (base64 SPKI).
    async fn register_user(
        &self,
        username: &str,
        public_key: &str,
    ) -> Result<UserSummary, ClientError>;

    /// Public key of `user_id`, or `None` if the user never registered.
    async fn lookup_public_key(&self, user_id: UserId) -> Result<Option<String>, ClientError>;
}

#[async_trait]
impl<T: KeyDirectory + ?Sized> KeyDirectory for std::sync::Arc<T> {
    async fn register_user(
        &self,
        username: &str,
        public_key: &str,
    ) -> Result<UserSummary, ClientError> {
        (**self).register_user(username, public_key).await
    }

    async fn lookup_public_key(&self, user_id: UserId) -> Result<Option<String>, ClientError> {
        (**self).lookup_public_key(user_id).await
    }
}
