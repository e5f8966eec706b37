//! Records shared by server storage, replies and client history handling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{FrameHeader, MessageId, UserId};

/// Upper bound on the bytes a message reply or push adds around its cipher
/// text and iv: ids, timestamp, field names and CBOR headers.
pub const MESSAGE_ENVELOPE_OVERHEAD: usize = 512;

/// Longest base64 cipher text the relay accepts.
///
/// A `Sent` reply, a `Deliver` push or a one-message `History` page carrying
/// it still fits in a single frame.
pub const MAX_CIPHER_TEXT_LEN: usize =
    FrameHeader::MAX_PAYLOAD_SIZE as usize - MESSAGE_ENVELOPE_OVERHEAD;

/// Ciphertext submitted for relay, before storage assigns an id.
///
/// `created_at` is the submission time; storage may move it forward to keep
/// creation order strictly increasing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedMessage {
    /// Author
    pub sender_id: UserId,
    /// Intended reader
    pub receiver_id: UserId,
    /// Base64 AES-GCM ciphertext with tag appended
    pub cipher_text: String,
    /// Base64 12-byte iv
    pub iv: String,
    /// Submission time
    pub created_at: DateTime<Utc>,
}

/// Durable, immutable form of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Storage-assigned id
    pub id: MessageId,
    /// Author
    pub sender_id: UserId,
    /// Intended reader
    pub receiver_id: UserId,
    /// Base64 AES-GCM ciphertext with tag appended
    pub cipher_text: String,
    /// Base64 12-byte iv
    pub iv: String,
    /// Creation time; history is ordered by this
    pub timestamp: DateTime<Utc>,
}

impl StoredMessage {
    /// Assemble from a submission and the storage-assigned id and time.
    #[must_use]
    pub fn from_submission(
        id: MessageId,
        message: EncryptedMessage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            cipher_text: message.cipher_text,
            iv: message.iv,
            timestamp,
        }
    }

    /// Whether this message travelled between `a` and `b`, in either
    /// direction.
    #[must_use]
    pub fn is_between(&self, a: UserId, b: UserId) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    /// Bytes this message can occupy inside an encoded payload, at most.
    #[must_use]
    pub fn encoded_size_bound(&self) -> usize {
        self.cipher_text.len() + self.iv.len() + MESSAGE_ENVELOPE_OVERHEAD
    }

    /// The other participant from `me`'s point of view.
    #[must_use]
    pub fn peer_of(&self, me: UserId) -> UserId {
        if self.sender_id == me { self.receiver_id } else { self.sender_id }
    }
}

/// Whether a user currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Connected and registered
    Online,
    /// Not reachable live
    Offline,
}

/// Directory entry as seen by clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    /// Identity
    pub user_id: UserId,
    /// Display name, unique across the directory
    pub username: String,
    /// Base64 SPKI public key
    pub public_key: String,
    /// Presence at the time of the request
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(sender: u8, receiver: u8) -> StoredMessage {
        StoredMessage {
            id: MessageId::from_random_bytes([9; 16]),
            sender_id: UserId::from_random_bytes([sender; 16]),
            receiver_id: UserId::from_random_bytes([receiver; 16]),
            cipher_text: "AA==".to_string(),
            iv: "AA==".to_string(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    #[test]
    fn between_is_direction_agnostic() {
        let m = message(1, 2);
        let a = UserId::from_random_bytes([1; 16]);
        let b = UserId::from_random_bytes([2; 16]);
        let c = UserId::from_random_bytes([3; 16]);

        assert!(m.is_between(a, b));
        assert!(m.is_between(b, a));
        assert!(!m.is_between(a, c));
        assert_eq!(m.peer_of(a), b);
        assert_eq!(m.peer_of(b), a);
    }

    #[test]
    fn wire_field_names_are_camel_case() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&message(1, 2), &mut buf).unwrap();
        let value: ciborium::Value = ciborium::de::from_reader(buf.as_slice()).unwrap();

        let keys: Vec<&str> = value
            .as_map()
            .unwrap()
            .iter()
            .filter_map(|(k, _)| k.as_text())
            .collect();
        assert_eq!(keys, ["id", "senderId", "receiverId", "cipherText", "iv", "timestamp"]);
    }

    #[test]
    fn size_bound_covers_actual_encoding() {
        let mut m = message(1, 2);
        m.cipher_text = "A".repeat(4096);
        m.iv = "AAAAAAAAAAAAAAAA".to_string();
        m.timestamp = DateTime::from_timestamp(4_102_444_800, 999_999_999).unwrap();

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&m, &mut buf).unwrap();
        assert!(buf.len() <= m.encoded_size_bound());
    }

    #[test]
    fn status_is_lowercase() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&PresenceStatus::Offline, &mut buf).unwrap();
        let value: ciborium::Value = ciborium::de::from_reader(buf.as_slice()).unwrap();
        assert_eq!(value.as_text(), Some("offline"));
    }
}
