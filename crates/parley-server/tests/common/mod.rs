//! Shared fixtures for relay integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeDelta, Utc};
use parley_crypto::{KeyPair, PublicKey, SharedSecret};
use parley_proto::{ErrorPayload, Payload, UserId, UserSummary, requests};
use parley_server::{
    ConnectionHandle, ConnectionSession, Directory, Environment, RecordingTransport, RelayConfig,
    ServerDriver, Storage,
};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Deterministic environment: seeded RNG and a hand-driven clock.
#[derive(Clone)]
pub struct SeededEnv {
    rng: Arc<Mutex<ChaCha8Rng>>,
    clock: Arc<Mutex<DateTime<Utc>>>,
}

impl SeededEnv {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))),
            clock: Arc::new(Mutex::new(
                DateTime::from_timestamp(1_700_000_000, 0).expect("valid epoch"),
            )),
        }
    }

    pub fn advance(&self, delta: TimeDelta) {
        *self.clock.lock().unwrap() += delta;
    }

    pub fn set_clock(&self, at: DateTime<Utc>) {
        *self.clock.lock().unwrap() = at;
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.clock.lock().unwrap()
    }
}

impl Environment for SeededEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        self.now()
    }
}

/// One simulated client: its key pair, directory entry and connection.
pub struct Peer {
    pub keys: KeyPair,
    pub user: UserSummary,
    pub session: ConnectionSession,
}

impl Peer {
    pub fn id(&self) -> UserId {
        self.user.user_id
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.session.handle
    }

    /// Derive the pair secret the way a client would, from the directory key.
    pub fn secret_with(&self, other: &Peer) -> SharedSecret {
        let peer_key = PublicKey::from_encoded(&other.user.public_key).unwrap();
        parley_crypto::derive(self.keys.private_key(), &peer_key)
    }
}

pub type TestDriver<S> = ServerDriver<S, RecordingTransport, SeededEnv>;

pub fn driver<S: Storage + Directory>(
    storage: S,
    env: &SeededEnv,
) -> (TestDriver<S>, RecordingTransport) {
    let transport = RecordingTransport::new();
    let driver =
        ServerDriver::new(storage, Arc::new(transport.clone()), env.clone(), RelayConfig::default());
    (driver, transport)
}

/// Enrol `username` with a fresh key pair on connection `handle`.
pub async fn enroll<S: Storage + Directory>(
    driver: &TestDriver<S>,
    username: &str,
    handle: u64,
) -> Peer {
    let keys = KeyPair::generate().unwrap();
    let mut session = ConnectionSession::new(ConnectionHandle(handle));

    let reply = driver
        .handle_payload(
            &mut session,
            Payload::RegisterUser(requests::RegisterUser {
                username: username.to_string(),
                public_key: keys.public_key().to_encoded(),
            }),
        )
        .await;

    let Payload::UserRegistered(registered) = reply else {
        panic!("registration failed: {reply:?}");
    };

    Peer { keys, user: registered.user, session }
}

/// Bind the peer's connection to its identity.
pub async fn connect<S: Storage + Directory>(driver: &TestDriver<S>, peer: &mut Peer) {
    let reply = driver
        .handle_payload(
            &mut peer.session,
            Payload::Register(requests::Register { user_id: peer.user.user_id }),
        )
        .await;
    assert_eq!(reply, Payload::Ack);
}

pub fn error_code(reply: &Payload) -> Option<u16> {
    match reply {
        Payload::Error(ErrorPayload { code, .. }) => Some(*code),
        _ => None,
    }
}
