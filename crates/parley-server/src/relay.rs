//! Relay service: persist ciphertext, then deliver it live if possible.
//!
//! The relay never sees plaintext. A submit is durable before anything is
//! pushed; if persistence fails the submit fails and nothing is delivered. A
//! failed live push is logged and swallowed, the recipient picks the message
//! up with its next history fetch.

use std::{sync::Arc, time::Duration};

use parley_crypto::{IV_SIZE, TAG_SIZE, encoding};
use parley_proto::{
    EncryptedMessage, FrameHeader, MAX_CIPHER_TEXT_LEN, StoredMessage, UserId,
    replies::Deliver,
    requests::SendMessage,
};
use thiserror::Error;

use crate::{
    env::Environment,
    registry::PresenceRegistry,
    storage::{Directory, Storage, StorageError, with_deadline},
    transport::{LiveTransport, PushEvent},
};

/// Relay tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Upper bound on every storage call made for a request.
    pub storage_timeout: Duration,
}

impl RelayConfig {
    /// Default storage deadline.
    pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { storage_timeout: Self::DEFAULT_STORAGE_TIMEOUT }
    }
}

/// Why a submit or history fetch failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Cipher text or iv is not valid base64 of a plausible length.
    #[error("malformed {field}: {reason}")]
    Decode {
        /// Offending field
        field: &'static str,
        /// What was wrong
        reason: String,
    },

    /// Receiver is not in the directory.
    #[error("unknown user: {user_id}")]
    NotFound {
        /// Missing user
        user_id: UserId,
    },

    /// Storage failed or timed out; nothing was delivered.
    #[error("persistence failed: {0}")]
    Persistence(#[source] StorageError),
}

impl RelayError {
    /// Whether resubmitting may succeed.
    ///
    /// Only persistence failures are worth retrying, and then with a fresh
    /// encryption of the original plaintext.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persistence(_))
    }
}

/// Accepts encrypted messages and routes them.
pub struct RelayService<S, T, E> {
    storage: S,
    registry: Arc<PresenceRegistry<T>>,
    env: E,
    config: RelayConfig,
}

impl<S, T, E> RelayService<S, T, E>
where
    S: Storage + Directory,
    T: LiveTransport,
    E: Environment,
{
    /// Relay over `storage`, delivering through `registry`'s transport.
    pub fn new(storage: S, registry: Arc<PresenceRegistry<T>>, env: E, config: RelayConfig) -> Self {
        Self { storage, registry, env, config }
    }

    /// Persist a message from `sender` and push it to the receiver if online.
    ///
    /// Returns the stored record once it is durable. Live delivery is best
    /// effort and its outcome is not reported.
    ///
    /// # Errors
    ///
    /// - `RelayError::Decode` if cipher text or iv is malformed
    /// - `RelayError::NotFound` if the receiver never registered
    /// - `RelayError::Persistence` if storage failed or timed out; no push
    ///   was attempted
    pub async fn submit(
        &self,
        sender: UserId,
        request: SendMessage,
    ) -> Result<StoredMessage, RelayError> {
        validate_ciphertext(&request.cipher_text, &request.iv)?;

        let receiver = request.receiver_id;
        let directory = self.storage.clone();
        match with_deadline(self.config.storage_timeout, move || directory.user(receiver)).await {
            Ok(_) => {},
            Err(StorageError::NotFound { user_id }) => return Err(RelayError::NotFound { user_id }),
            Err(e) => return Err(RelayError::Persistence(e)),
        }

        let message = EncryptedMessage {
            sender_id: sender,
            receiver_id: receiver,
            cipher_text: request.cipher_text,
            iv: request.iv,
            created_at: self.env.wall_clock(),
        };
        let id = self.env.new_message_id();

        let storage = self.storage.clone();
        let stored = with_deadline(self.config.storage_timeout, move || {
            storage.insert_message(id, message)
        })
        .await
        .map_err(|e| {
            tracing::error!(sender = %sender, receiver = %receiver, error = %e, "persist failed");
            RelayError::Persistence(e)
        })?;

        tracing::debug!(id = %stored.id, sender = %sender, receiver = %receiver, "message stored");

        self.deliver(&stored);

        Ok(stored)
    }

    /// Push `message` to its receiver if online. Failures are logged only.
    fn deliver(&self, message: &StoredMessage) {
        let Some(handle) = self.registry.lookup(message.receiver_id) else {
            tracing::debug!(id = %message.id, "receiver offline, stored only");
            return;
        };

        let event = PushEvent::Deliver(Deliver::from(message));
        if let Err(e) = self.registry.transport().push(handle, event) {
            tracing::warn!(id = %message.id, %handle, error = %e, "live delivery dropped");
        }
    }

    /// Every message between `user_id` and `peer_id`, oldest first.
    ///
    /// Unknown users yield an empty history.
    ///
    /// # Errors
    ///
    /// - `RelayError::Persistence` if storage failed or timed out
    pub async fn fetch_history(
        &self,
        user_id: UserId,
        peer_id: UserId,
    ) -> Result<Vec<StoredMessage>, RelayError> {
        let storage = self.storage.clone();
        with_deadline(self.config.storage_timeout, move || {
            storage.messages_between(user_id, peer_id)
        })
        .await
        .map_err(RelayError::Persistence)
    }

    /// The page of history starting `cursor` messages in, and the cursor of
    /// the page after it.
    ///
    /// Pages are cut so their `History` reply fits in one frame. Each page
    /// holds at least one message, so the cursor always advances. A cursor
    /// past the end yields an empty last page.
    ///
    /// # Errors
    ///
    /// - `RelayError::Persistence` if storage failed or timed out
    pub async fn fetch_history_page(
        &self,
        user_id: UserId,
        peer_id: UserId,
        cursor: u64,
    ) -> Result<(Vec<StoredMessage>, Option<u64>), RelayError> {
        let messages = self.fetch_history(user_id, peer_id).await?;
        Ok(history_page(messages, cursor))
    }
}

/// Bytes one `History` page may spend on messages; the rest of the frame is
/// left for the reply envelope.
const HISTORY_PAGE_BUDGET: usize = FrameHeader::MAX_PAYLOAD_SIZE as usize - 64;

fn history_page(messages: Vec<StoredMessage>, cursor: u64) -> (Vec<StoredMessage>, Option<u64>) {
    let skip = usize::try_from(cursor).unwrap_or(usize::MAX);
    let mut remaining = messages.into_iter().skip(skip).peekable();
    let mut page = Vec::new();
    let mut used = 0;

    while let Some(message) = remaining.peek() {
        let size = message.encoded_size_bound();
        if !page.is_empty() && used + size > HISTORY_PAGE_BUDGET {
            break;
        }
        used += size;
        page.extend(remaining.next());
    }

    let next = remaining.peek().is_some().then(|| cursor + page.len() as u64);
    (page, next)
}

/// Reject cipher text and iv that could never decrypt.
///
/// The relay cannot check the tag, only that both fields are base64, the iv
/// is 96 bits and the cipher text is between one tag and
/// `MAX_CIPHER_TEXT_LEN` characters long. The upper bound keeps the `Sent`
/// reply and `Deliver` push within one frame.
fn validate_ciphertext(cipher_text: &str, iv: &str) -> Result<(), RelayError> {
    if cipher_text.len() > MAX_CIPHER_TEXT_LEN {
        return Err(RelayError::Decode {
            field: "cipherText",
            reason: format!("longer than {MAX_CIPHER_TEXT_LEN} characters"),
        });
    }

    let iv_bytes = encoding::decode(iv)
        .map_err(|e| RelayError::Decode { field: "iv", reason: e.to_string() })?;
    if iv_bytes.len() != IV_SIZE {
        return Err(RelayError::Decode {
            field: "iv",
            reason: format!("expected {IV_SIZE} bytes, got {}", iv_bytes.len()),
        });
    }

    let body = encoding::decode(cipher_text)
        .map_err(|e| RelayError::Decode { field: "cipherText", reason: e.to_string() })?;
    if body.len() < TAG_SIZE {
        return Err(RelayError::Decode {
            field: "cipherText",
            reason: format!("shorter than the {TAG_SIZE}-byte tag"),
        });
    }

    Ok(())
}
