//! Client to server payloads.

use serde::{Deserialize, Serialize};

use crate::UserId;

/// Bind the connection to an identity so it receives live pushes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Register {
    /// Identity to bind
    pub user_id: UserId,
}

/// Submit ciphertext for persistence and live delivery
///
/// The sender is the identity bound by [`Register`]; a connection cannot send
/// on behalf of anyone else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Intended reader
    pub receiver_id: UserId,
    /// Base64 ciphertext with tag appended
    pub cipher_text: String,
    /// Base64 12-byte iv
    pub iv: String,
}

/// Create a directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    /// Unique display name
    pub username: String,
    /// Base64 SPKI public key
    pub public_key: String,
}

/// Look up one user's public key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupPublicKey {
    /// Whose key
    pub user_id: UserId,
}

/// Fetch one page of the messages between two users
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchHistory {
    /// One participant
    pub user_id: UserId,
    /// The other participant
    pub peer_id: UserId,
    /// Messages to skip, taken from the previous page's `next`; absent for
    /// the first page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<u64>,
}
