//! Per-peer encryption sessions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use parley_crypto::{CryptoError, PublicKey, SharedSecret, TrustLevel};
use parley_proto::{StoredMessage, UserId, requests::SendMessage};

use crate::{ClientError, KeyDirectory, LocalKeyStore};

/// Shared secret with one peer.
///
/// Both directions of a conversation use the same secret, so a session opens
/// messages the local user sent as well as ones it received.
#[derive(Debug)]
pub struct Session {
    peer: UserId,
    secret: SharedSecret,
}

impl Session {
    /// Session with `peer` under an already derived secret.
    pub fn new(peer: UserId, secret: SharedSecret) -> Self {
        Self { peer, secret }
    }

    /// The other participant
    pub fn peer(&self) -> UserId {
        self.peer
    }

    /// Whether the peer key was confirmed out of band
    pub fn trust_level(&self) -> TrustLevel {
        self.secret.trust_level()
    }

    /// Encrypt `plaintext` into a request addressed to the peer.
    ///
    /// Every call draws a fresh iv; never reuse the result for a different
    /// plaintext.
    pub fn seal(&self, plaintext: &str) -> Result<SendMessage, ClientError> {
        let sealed = parley_crypto::encrypt(plaintext.as_bytes(), &self.secret)?;
        Ok(SendMessage { receiver_id: self.peer, cipher_text: sealed.cipher_text, iv: sealed.iv })
    }

    /// Decrypt one message to text.
    ///
    /// # Errors
    ///
    /// - `ClientError::Crypto` with `CryptoError::Decrypt` if the tag does
    ///   not verify or the plaintext is not UTF-8
    /// - `ClientError::Crypto` with `CryptoError::Decode` if either field is
    ///   not base64
    pub fn open(&self, cipher_text: &str, iv: &str) -> Result<String, ClientError> {
        let plaintext = parley_crypto::decrypt(cipher_text, iv, &self.secret)?;
        String::from_utf8(plaintext).map_err(|_| ClientError::Crypto(CryptoError::Decrypt))
    }

    /// Decrypt a conversation. One unreadable message never hides the rest.
    pub fn open_history(&self, messages: &[StoredMessage]) -> Vec<HistoryEntry> {
        messages
            .iter()
            .map(|message| match self.open(&message.cipher_text, &message.iv) {
                Ok(text) => HistoryEntry::Readable { message: message.clone(), text },
                Err(error) => {
                    tracing::debug!(
                        message_id = %message.id,
                        peer = %self.peer,
                        %error,
                        "history entry unreadable"
                    );
                    HistoryEntry::Unreadable { message: message.clone(), error }
                },
            })
            .collect()
    }
}

/// One message of a decrypted conversation.
#[derive(Debug)]
pub enum HistoryEntry {
    /// Decrypted successfully
    Readable {
        /// Stored envelope
        message: StoredMessage,
        /// Plaintext
        text: String,
    },
    /// Could not be decrypted under the current session key
    Unreadable {
        /// Stored envelope
        message: StoredMessage,
        /// Why
        error: ClientError,
    },
}

impl HistoryEntry {
    /// Stored envelope, readable or not
    pub fn message(&self) -> &StoredMessage {
        match self {
            Self::Readable { message, .. } | Self::Unreadable { message, .. } => message,
        }
    }

    /// Plaintext if readable
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Readable { text, .. } => Some(text),
            Self::Unreadable { .. } => None,
        }
    }
}

/// Opens and caches sessions for the local identity.
pub struct SessionManager<D, K> {
    directory: D,
    keystore: K,
    sessions: Mutex<HashMap<UserId, Arc<Session>>>,
}

impl<D: KeyDirectory, K: LocalKeyStore> SessionManager<D, K> {
    /// Manager over `directory` for peer keys and `keystore` for our own.
    pub fn new(directory: D, keystore: K) -> Self {
        Self { directory, keystore, sessions: Mutex::new(HashMap::new()) }
    }

    /// Directory used for peer lookups
    pub fn directory(&self) -> &D {
        &self.directory
    }

    /// Local keystore
    pub fn keystore(&self) -> &K {
        &self.keystore
    }

    /// Session with `peer`, deriving and caching it on first use.
    ///
    /// # Errors
    ///
    /// - `ClientError::NotAuthenticated` if the device has no identity
    /// - `ClientError::PeerKeyNotFound` if the peer never registered
    /// - `ClientError::Crypto` with `CryptoError::Agreement` if the directory
    ///   returned an unusable key
    pub async fn open(&self, peer: UserId) -> Result<Arc<Session>, ClientError> {
        if let Some(session) = self.session(peer) {
            return Ok(session);
        }

        let identity = self.keystore.load()?.ok_or(ClientError::NotAuthenticated)?;
        let encoded = self
            .directory
            .lookup_public_key(peer)
            .await?
            .ok_or(ClientError::PeerKeyNotFound { peer })?;
        let peer_key = PublicKey::from_encoded(&encoded)
            .map_err(|e| CryptoError::Agreement { reason: e.to_string() })?;

        let secret = parley_crypto::derive(identity.private_key(), &peer_key);
        tracing::debug!(%peer, fingerprint = %peer_key.fingerprint(), "session established");

        // Two concurrent opens derive the same secret; keep whichever landed first.
        let mut sessions = self.lock();
        let session =
            sessions.entry(peer).or_insert_with(|| Arc::new(Session::new(peer, secret))).clone();
        Ok(session)
    }

    /// Cached session with `peer`, if any.
    pub fn session(&self, peer: UserId) -> Option<Arc<Session>> {
        self.lock().get(&peer).cloned()
    }

    /// Drop the cached session so the next open re-reads the peer key.
    pub fn forget(&self, peer: UserId) -> bool {
        self.lock().remove(&peer).is_some()
    }

    /// Drop every cached session. Call on logout.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of cached sessions
    pub fn session_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<UserId, Arc<Session>>> {
        // The map holds no invariant a panicking holder could break.
        self.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use parley_crypto::KeyPair;
    use parley_proto::MessageId;

    use super::*;

    fn pair() -> (Session, Session) {
        let alice = KeyPair::generate().unwrap();
        let bob = KeyPair::generate().unwrap();
        let a_id = UserId::from_random_bytes([1; 16]);
        let b_id = UserId::from_random_bytes([2; 16]);
        (
            Session::new(b_id, parley_crypto::derive(alice.private_key(), bob.public_key())),
            Session::new(a_id, parley_crypto::derive(bob.private_key(), alice.public_key())),
        )
    }

    fn stored(from: UserId, to: UserId, request: &SendMessage, n: u8) -> StoredMessage {
        StoredMessage {
            id: MessageId::from_random_bytes([n; 16]),
            sender_id: from,
            receiver_id: to,
            cipher_text: request.cipher_text.clone(),
            iv: request.iv.clone(),
            timestamp: DateTime::from_timestamp(1_700_000_000 + i64::from(n), 0).unwrap(),
        }
    }

    #[test]
    fn sealed_by_one_side_opens_on_the_other() {
        let (alice, bob) = pair();
        let request = alice.seal("merhaba").unwrap();
        assert_eq!(request.receiver_id, alice.peer());
        assert_eq!(bob.open(&request.cipher_text, &request.iv).unwrap(), "merhaba");
    }

    #[test]
    fn sender_can_read_own_messages() {
        let (alice, _) = pair();
        let request = alice.seal("note to self").unwrap();
        assert_eq!(alice.open(&request.cipher_text, &request.iv).unwrap(), "note to self");
    }

    #[test]
    fn empty_message_round_trips() {
        let (alice, bob) = pair();
        let request = alice.seal("").unwrap();
        assert_eq!(bob.open(&request.cipher_text, &request.iv).unwrap(), "");
    }

    #[test]
    fn foreign_session_cannot_read() {
        let (alice, _) = pair();
        let (mallory, _) = pair();
        let request = alice.seal("secret").unwrap();
        let result = mallory.open(&request.cipher_text, &request.iv);
        assert!(matches!(result, Err(ClientError::Crypto(CryptoError::Decrypt))));
    }

    #[test]
    fn history_marks_unreadable_entries_and_keeps_going() {
        let (alice, bob) = pair();
        let (mallory, _) = pair();
        let a_id = bob.peer();
        let b_id = alice.peer();

        let first = stored(a_id, b_id, &alice.seal("one").unwrap(), 1);
        let garbled = stored(a_id, b_id, &mallory.seal("noise").unwrap(), 2);
        let third = stored(b_id, a_id, &bob.seal("three").unwrap(), 3);

        let entries = alice.open_history(&[first.clone(), garbled.clone(), third.clone()]);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text(), Some("one"));
        assert!(entries[1].text().is_none());
        assert_eq!(entries[1].message(), &garbled);
        assert_eq!(entries[2].text(), Some("three"));
        assert_eq!(entries[2].message(), &third);
    }

    #[test]
    fn fresh_sessions_are_unverified() {
        let (alice, _) = pair();
        assert_eq!(alice.trust_level(), TrustLevel::Unverified);
    }
}
