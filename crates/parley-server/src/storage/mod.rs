//! Storage collaborators for the relay.
//!
//! Two synchronous traits: [`Storage`] persists ciphertext and answers history
//! queries, [`Directory`] holds user records and public keys. Every backend
//! implements both. The relay calls them through [`with_deadline`], which moves
//! the call onto the blocking pool and bounds it with a timeout, so a stalled
//! disk never blocks the async runtime or hangs a submit forever.

mod chaotic;
mod error;
mod memory;
mod redb;

use std::time::Duration;

pub use chaotic::ChaoticStorage;
use chrono::{DateTime, SubsecRound, TimeDelta, Utc};
pub use error::StorageError;
pub use memory::MemoryStorage;
use parley_proto::{EncryptedMessage, MessageId, StoredMessage, UserId, UserSummary};
use serde::{Deserialize, Serialize};

pub use self::redb::RedbStorage;

/// A directory entry as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Identity
    pub user_id: UserId,
    /// Unique display name
    pub username: String,
    /// Base64 SPKI public key
    pub public_key: String,
}

impl UserRecord {
    /// Client view of this record with the given presence.
    pub fn to_summary(&self, online: bool) -> UserSummary {
        UserSummary {
            user_id: self.user_id,
            username: self.username.clone(),
            public_key: self.public_key.clone(),
            online,
        }
    }
}

/// Message persistence
///
/// Must be Clone (shared by every connection task), Send + Sync, and
/// synchronous. Implementations share internal state via Arc, so clones access
/// the same underlying storage.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Persist a message under `id`.
    ///
    /// # Invariants
    ///
    /// - Post: the returned timestamp is strictly greater than every timestamp
    ///   previously returned by this store, and not earlier than
    ///   `message.created_at` (truncated to microseconds)
    /// - Post: the message is durable when this returns `Ok`
    fn insert_message(
        &self,
        id: MessageId,
        message: EncryptedMessage,
    ) -> Result<StoredMessage, StorageError>;

    /// Every message between `a` and `b` in either direction, oldest first.
    ///
    /// Unknown users simply have no messages.
    fn messages_between(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>, StorageError>;
}

/// User records and public keys
pub trait Directory: Clone + Send + Sync + 'static {
    /// Create a directory entry.
    ///
    /// # Errors
    ///
    /// - `StorageError::Conflict` if the username is taken
    fn register_user(&self, record: UserRecord) -> Result<(), StorageError>;

    /// Look up a user.
    ///
    /// # Errors
    ///
    /// - `StorageError::NotFound` if no such user exists
    fn user(&self, user_id: UserId) -> Result<UserRecord, StorageError>;

    /// Every registered user, ordered by username.
    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError>;
}

/// Timestamp for the next stored message given the previous one.
///
/// Messages within one store are totally ordered by timestamp, so history
/// ordered by time equals submission order even when the clock stalls or
/// steps backwards.
pub(crate) fn next_timestamp(
    requested: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let requested = requested.trunc_subsecs(6);
    match last {
        Some(last) if requested <= last => last + TimeDelta::microseconds(1),
        _ => requested,
    }
}

/// Run a blocking storage call on the blocking pool with a deadline.
///
/// A call that outlives the deadline keeps running to completion in the
/// background; only the caller stops waiting. For inserts this means a
/// timed-out submit may still have been persisted.
///
/// # Errors
///
/// - `StorageError::Timeout` if the deadline passes first
/// - `StorageError::Io` if the blocking task panicked
/// - Any error returned by `op`
pub async fn with_deadline<R, F>(deadline: Duration, op: F) -> Result<R, StorageError>
where
    F: FnOnce() -> Result<R, StorageError> + Send + 'static,
    R: Send + 'static,
{
    let task = tokio::task::spawn_blocking(op);

    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(StorageError::Io(format!("storage task failed: {join}"))),
        Err(_) => Err(StorageError::Timeout(deadline)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_micros(micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(micros).unwrap()
    }

    #[test]
    fn next_timestamp_keeps_clock_when_ahead() {
        assert_eq!(next_timestamp(at_micros(10), Some(at_micros(5))), at_micros(10));
        assert_eq!(next_timestamp(at_micros(10), None), at_micros(10));
    }

    #[test]
    fn next_timestamp_bumps_stalled_clock() {
        assert_eq!(next_timestamp(at_micros(5), Some(at_micros(5))), at_micros(6));
        assert_eq!(next_timestamp(at_micros(3), Some(at_micros(5))), at_micros(6));
    }

    #[test]
    fn next_timestamp_truncates_to_micros() {
        let precise = at_micros(7) + TimeDelta::nanoseconds(999);
        assert_eq!(next_timestamp(precise, None), at_micros(7));
    }

    #[tokio::test]
    async fn deadline_passes_result_through() {
        let result = with_deadline(Duration::from_secs(1), || Ok(7)).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn deadline_times_out_slow_call() {
        let result = with_deadline(Duration::from_millis(10), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .await;
        assert_eq!(result, Err(StorageError::Timeout(Duration::from_millis(10))));
    }
}
