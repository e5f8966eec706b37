//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! Messages, users and the timestamp/sequence counters survive restarts.

use std::{path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use parley_proto::{EncryptedMessage, MessageId, StoredMessage, UserId};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};

use super::{Directory, Storage, StorageError, UserRecord, next_timestamp};

/// Table: messages
/// Key: (low user id, high user id, sequence) as big-endian bytes [40 bytes]
/// Value: CBOR-encoded `StoredMessage`
///
/// The pair is ordered so both directions of a conversation share one key
/// prefix; the global sequence keeps insertion order within it.
const MESSAGES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("messages");

/// Table: users
/// Key: user id bytes [16 bytes]
/// Value: CBOR-encoded `UserRecord`
const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");

/// Table: usernames
/// Key: username
/// Value: user id bytes [16 bytes]
const USERNAMES: TableDefinition<&str, &[u8]> = TableDefinition::new("usernames");

/// Table: meta
/// Key: counter name
/// Value: counter value
const META: TableDefinition<&str, i64> = TableDefinition::new("meta");

const SEQUENCE: &str = "sequence";
const LAST_TIMESTAMP_MICROS: &str = "last_timestamp_micros";

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

fn io(err: impl std::fmt::Display) -> StorageError {
    StorageError::Io(err.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    ciborium::from_reader(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        {
            let _ = txn.open_table(MESSAGES).map_err(io)?;
            let _ = txn.open_table(USERS).map_err(io)?;
            let _ = txn.open_table(USERNAMES).map_err(io)?;
            let _ = txn.open_table(META).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn insert_message(
        &self,
        id: MessageId,
        message: EncryptedMessage,
    ) -> Result<StoredMessage, StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        let stored = {
            let mut meta = txn.open_table(META).map_err(io)?;
            let sequence = meta.get(SEQUENCE).map_err(io)?.map_or(0, |v| v.value());
            let last = meta
                .get(LAST_TIMESTAMP_MICROS)
                .map_err(io)?
                .and_then(|v| DateTime::<Utc>::from_timestamp_micros(v.value()));

            let timestamp = next_timestamp(message.created_at, last);
            let stored = StoredMessage::from_submission(id, message, timestamp);

            let key = encode_message_key(stored.sender_id, stored.receiver_id, sequence as u64);
            let value = encode(&stored)?;

            let mut messages = txn.open_table(MESSAGES).map_err(io)?;
            messages.insert(key.as_slice(), value.as_slice()).map_err(io)?;

            meta.insert(SEQUENCE, sequence + 1).map_err(io)?;
            meta.insert(LAST_TIMESTAMP_MICROS, timestamp.timestamp_micros()).map_err(io)?;

            stored
        };

        txn.commit().map_err(io)?;

        Ok(stored)
    }

    fn messages_between(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(MESSAGES).map_err(io)?;

        let start = encode_message_key(a, b, 0);
        let end = encode_message_key(a, b, u64::MAX);

        let mut messages = Vec::new();
        for entry in table.range(start.as_slice()..=end.as_slice()).map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            messages.push(decode(value.value())?);
        }

        Ok(messages)
    }
}

impl Directory for RedbStorage {
    fn register_user(&self, record: UserRecord) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(io)?;

        {
            let mut usernames = txn.open_table(USERNAMES).map_err(io)?;
            if usernames.get(record.username.as_str()).map_err(io)?.is_some() {
                return Err(StorageError::Conflict { username: record.username });
            }
            usernames
                .insert(record.username.as_str(), record.user_id.as_bytes().as_slice())
                .map_err(io)?;

            let value = encode(&record)?;
            let mut users = txn.open_table(USERS).map_err(io)?;
            users.insert(record.user_id.as_bytes().as_slice(), value.as_slice()).map_err(io)?;
        }

        txn.commit().map_err(io)?;

        Ok(())
    }

    fn user(&self, user_id: UserId) -> Result<UserRecord, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;

        let value =
            table.get(user_id.as_bytes().as_slice()).map_err(io)?.ok_or(StorageError::NotFound {
                user_id,
            })?;

        decode(value.value())
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(USERS).map_err(io)?;

        let mut users: Vec<UserRecord> = Vec::new();
        for entry in table.iter().map_err(io)? {
            let (_, value) = entry.map_err(io)?;
            users.push(decode(value.value())?);
        }

        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}

/// Encode a message key: ordered pair then sequence, all big-endian.
fn encode_message_key(a: UserId, b: UserId, sequence: u64) -> [u8; 40] {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };

    let mut key = [0u8; 40];
    key[0..16].copy_from_slice(low.as_bytes());
    key[16..32].copy_from_slice(high.as_bytes());
    key[32..40].copy_from_slice(&sequence.to_be_bytes());
    key
}
