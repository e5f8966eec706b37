//! Server to client payloads: replies and pushes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{PresenceStatus, StoredMessage, UserId, UserSummary};

/// Reply to `Send` once the message is durable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sent {
    /// Persisted record, including storage-assigned id and timestamp
    pub message: StoredMessage,
}

/// Reply to `RegisterUser`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistered {
    /// The new entry
    pub user: UserSummary,
}

/// Reply to `LookupPublicKey`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyReply {
    /// Whose key
    pub user_id: UserId,
    /// Base64 SPKI public key
    pub public_key: String,
}

/// Reply to `ListUsers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserList {
    /// Every registered user
    pub users: Vec<UserSummary>,
}

/// Reply to `FetchHistory`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct History {
    /// Messages in both directions, oldest first
    pub messages: Vec<StoredMessage>,
    /// Cursor for the following page; absent on the last one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<u64>,
}

/// Push: a user came online or went offline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChanged {
    /// Whose presence changed
    pub user_id: UserId,
    /// New presence
    pub status: PresenceStatus,
}

/// Push: a message arrived for the connected user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deliver {
    /// Author
    pub sender_id: UserId,
    /// Base64 ciphertext with tag appended
    pub cipher_text: String,
    /// Base64 12-byte iv
    pub iv: String,
    /// Persisted creation time
    pub timestamp: DateTime<Utc>,
}

impl From<&StoredMessage> for Deliver {
    fn from(message: &StoredMessage) -> Self {
        Self {
            sender_id: message.sender_id,
            cipher_text: message.cipher_text.clone(),
            iv: message.iv.clone(),
            timestamp: message.timestamp,
        }
    }
}
