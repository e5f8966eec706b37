use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use parley_proto::{EncryptedMessage, MessageId, StoredMessage, UserId};

use super::{Directory, Storage, StorageError, UserRecord, next_timestamp};

/// In-memory storage for tests and single-process deployments
///
/// Messages are kept in insertion order in one `Vec`, so history is a filter
/// over that log. All state sits behind one `Arc<Mutex<_>>`; clones share it.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

#[derive(Default)]
struct MemoryStorageInner {
    /// Every message, insertion order
    messages: Vec<StoredMessage>,

    /// Timestamp of the newest message
    last_timestamp: Option<DateTime<Utc>>,

    /// User id → record
    users: HashMap<UserId, UserRecord>,

    /// Username → user id (uniqueness index)
    usernames: HashMap<String, UserId>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored messages.
    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Total number of registered users.
    pub fn user_count(&self) -> usize {
        self.lock().users.len()
    }

    // INVARIANT: no code path panics while holding this lock.
    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, MemoryStorageInner> {
        self.inner.lock().expect("invariant: memory storage mutex not poisoned")
    }
}

impl Storage for MemoryStorage {
    fn insert_message(
        &self,
        id: MessageId,
        message: EncryptedMessage,
    ) -> Result<StoredMessage, StorageError> {
        let mut inner = self.lock();

        let timestamp = next_timestamp(message.created_at, inner.last_timestamp);
        let stored = StoredMessage::from_submission(id, message, timestamp);

        inner.last_timestamp = Some(timestamp);
        inner.messages.push(stored.clone());

        Ok(stored)
    }

    fn messages_between(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>, StorageError> {
        let inner = self.lock();
        Ok(inner.messages.iter().filter(|m| m.is_between(a, b)).cloned().collect())
    }
}

impl Directory for MemoryStorage {
    fn register_user(&self, record: UserRecord) -> Result<(), StorageError> {
        let mut inner = self.lock();

        if inner.usernames.contains_key(&record.username) {
            return Err(StorageError::Conflict { username: record.username });
        }

        inner.usernames.insert(record.username.clone(), record.user_id);
        inner.users.insert(record.user_id, record);
        Ok(())
    }

    fn user(&self, user_id: UserId) -> Result<UserRecord, StorageError> {
        self.lock().users.get(&user_id).cloned().ok_or(StorageError::NotFound { user_id })
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let mut users: Vec<UserRecord> = self.lock().users.values().cloned().collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(byte: u8) -> UserId {
        UserId::from_random_bytes([byte; 16])
    }

    fn message(from: u8, to: u8, at: DateTime<Utc>) -> EncryptedMessage {
        EncryptedMessage {
            sender_id: user(from),
            receiver_id: user(to),
            cipher_text: format!("ct-{from}-{to}"),
            iv: "AAAAAAAAAAAAAAAA".to_string(),
            created_at: at,
        }
    }

    fn record(byte: u8, name: &str) -> UserRecord {
        UserRecord { user_id: user(byte), username: name.to_string(), public_key: "pk".into() }
    }

    #[test]
    fn history_filters_pair_in_both_directions() {
        let storage = MemoryStorage::new();
        let now = Utc::now();

        storage.insert_message(MessageId::from_random_bytes([1; 16]), message(1, 2, now)).unwrap();
        storage.insert_message(MessageId::from_random_bytes([2; 16]), message(3, 1, now)).unwrap();
        storage.insert_message(MessageId::from_random_bytes([3; 16]), message(2, 1, now)).unwrap();

        let history = storage.messages_between(user(1), user(2)).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender_id, user(1));
        assert_eq!(history[1].sender_id, user(2));
        assert!(history[0].timestamp < history[1].timestamp);
        assert_eq!(storage.message_count(), 3);
    }

    #[test]
    fn unknown_pair_has_empty_history() {
        let storage = MemoryStorage::new();
        assert!(storage.messages_between(user(8), user(9)).unwrap().is_empty());
    }

    #[test]
    fn duplicate_username_conflicts() {
        let storage = MemoryStorage::new();
        storage.register_user(record(1, "alice")).unwrap();

        let result = storage.register_user(record(2, "alice"));
        assert_eq!(result, Err(StorageError::Conflict { username: "alice".into() }));
        assert_eq!(storage.user_count(), 1);
    }

    #[test]
    fn unknown_user_not_found() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.user(user(5)), Err(StorageError::NotFound { user_id: user(5) }));
    }

    #[test]
    fn users_listed_by_name() {
        let storage = MemoryStorage::new();
        storage.register_user(record(1, "carol")).unwrap();
        storage.register_user(record(2, "alice")).unwrap();
        storage.register_user(record(3, "bob")).unwrap();

        let names: Vec<String> =
            storage.list_users().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }
}
