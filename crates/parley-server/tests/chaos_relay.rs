//! Relay invariants under random storage failures.
//!
//! With `ChaoticStorage` failing a random share of calls:
//! - every acknowledged message is in history, in submission order
//! - no rejected message is ever stored or delivered
//! - live deliveries are exactly the acknowledged messages

mod common;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use common::SeededEnv;
use parley_proto::{EncryptedMessage, MessageId, requests::SendMessage};
use parley_server::{
    ChaoticStorage, ConnectionHandle, Directory, MemoryStorage, PresenceRegistry, PushEvent,
    RecordingTransport, RedbStorage, RelayConfig, RelayService, Storage, UserRecord,
};
use proptest::prelude::*;
use tempfile::tempdir;

fn record(byte: u8, name: &str) -> UserRecord {
    UserRecord {
        user_id: parley_proto::UserId::from_random_bytes([byte; 16]),
        username: name.to_string(),
        public_key: "unused".to_string(),
    }
}

fn body(n: usize) -> String {
    parley_crypto::encoding::encode(format!("ciphertext-{n:04}-padding").as_bytes())
}

fn iv() -> String {
    parley_crypto::encoding::encode(&[9u8; parley_crypto::IV_SIZE])
}

/// Submit `count` messages alternating direction and check every invariant.
fn run_chaos<S: Storage + Directory>(backend: S, failure_rate: f64, seed: u64, count: usize) {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();

    let alice = record(1, "alice");
    let bob = record(2, "bob");
    backend.register_user(alice.clone()).unwrap();
    backend.register_user(bob.clone()).unwrap();

    let chaotic = ChaoticStorage::with_seed(backend.clone(), failure_rate, seed);
    let transport = RecordingTransport::new();
    let registry = Arc::new(PresenceRegistry::new(Arc::new(transport.clone())));
    registry.register(alice.user_id, ConnectionHandle(1));
    registry.register(bob.user_id, ConnectionHandle(2));
    transport.clear();

    let env = SeededEnv::new(seed);
    let relay = RelayService::new(chaotic, registry, env, RelayConfig::default());

    let mut accepted = Vec::new();
    runtime.block_on(async {
        for n in 0..count {
            let (sender, receiver) =
                if n % 2 == 0 { (alice.user_id, bob.user_id) } else { (bob.user_id, alice.user_id) };
            let request = SendMessage { receiver_id: receiver, cipher_text: body(n), iv: iv() };

            match relay.submit(sender, request).await {
                Ok(stored) => accepted.push(stored),
                Err(e) => assert!(e.is_retryable(), "only persistence may fail here: {e}"),
            }
        }
    });

    let history = backend.messages_between(alice.user_id, bob.user_id).unwrap();
    assert_eq!(history, accepted, "history must equal acknowledged submits, in order");

    let delivered: Vec<String> = transport
        .pushes()
        .into_iter()
        .filter_map(|(_, event)| match event {
            PushEvent::Deliver(d) => Some(d.cipher_text),
            PushEvent::Status(_) => None,
        })
        .collect();
    let expected: Vec<String> = accepted.iter().map(|m| m.cipher_text.clone()).collect();
    assert_eq!(delivered, expected, "deliveries must equal acknowledged submits");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn memory_relay_survives_chaos(
        failure_rate in 0.0..0.8,
        seed in any::<u64>(),
        count in 1usize..40,
    ) {
        run_chaos(MemoryStorage::new(), failure_rate, seed, count);
    }
}

#[test]
fn redb_relay_survives_chaos() {
    for seed in [1u64, 7, 42] {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("chaos.redb")).unwrap();
        run_chaos(storage, 0.4, seed, 30);
    }
}

#[test]
fn storage_timestamps_strictly_increase_with_stalled_clock() {
    let storage = MemoryStorage::new();
    let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

    let mut last = None;
    for n in 0..50u8 {
        let message = EncryptedMessage {
            sender_id: record(1, "a").user_id,
            receiver_id: record(2, "b").user_id,
            cipher_text: body(n.into()),
            iv: iv(),
            // Clock jitters backwards every third message
            created_at: at - TimeDelta::milliseconds(i64::from(n % 3)),
        };
        let stored = storage.insert_message(MessageId::from_random_bytes([n; 16]), message).unwrap();
        if let Some(previous) = last {
            assert!(stored.timestamp > previous);
        }
        last = Some(stored.timestamp);
    }
}
