//! Presence registry: which identity is reachable on which connection.
//!
//! Maintains bidirectional mappings: user → handle (for live delivery) and
//! handle → user (for cleanup on disconnect). Both are updated under one lock
//! so they never disagree.
//!
//! Every transition broadcasts a `StatusChanged` push to all *other* online
//! users. Broadcasts happen after the lock is released, using the recipient
//! list copied under it.
//!
//! One connection per identity: the last registration wins. A displaced
//! connection is not told; its later disconnect finds no entry and is ignored.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use parley_proto::{PresenceStatus, UserId, replies::StatusChanged};

use crate::transport::{ConnectionHandle, LiveTransport, PushEvent};

#[derive(Debug, Default)]
struct Entries {
    /// User → live connection
    by_user: HashMap<UserId, ConnectionHandle>,
    /// Connection → bound user (reverse index)
    by_handle: HashMap<ConnectionHandle, UserId>,
}

impl Entries {
    fn recipients_except(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        self.by_user.iter().filter(|(u, _)| **u != user_id).map(|(_, h)| *h).collect()
    }
}

/// Process-wide presence map.
///
/// Exposes only register, lookup and unregister (plus read-only queries); the
/// underlying maps are never handed out.
pub struct PresenceRegistry<T> {
    transport: Arc<T>,
    entries: Mutex<Entries>,
}

impl<T: LiveTransport> PresenceRegistry<T> {
    /// Empty registry broadcasting through `transport`.
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport, entries: Mutex::new(Entries::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        #[allow(clippy::expect_used)]
        self.entries.lock().expect("invariant: presence mutex poisoned")
    }

    /// Transport used for broadcasts.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Bind `user_id` to `handle` and announce it online.
    ///
    /// Upsert: a previous handle for the same user is replaced. If `handle`
    /// was bound to a different user, that user goes offline first. Always
    /// broadcasts, even when the binding did not change.
    pub fn register(&self, user_id: UserId, handle: ConnectionHandle) {
        let (displaced, recipients) = {
            let mut entries = self.lock();

            let displaced = match entries.by_handle.get(&handle) {
                Some(&previous) if previous != user_id => {
                    entries.by_user.remove(&previous);
                    Some(previous)
                },
                _ => None,
            };

            match entries.by_user.insert(user_id, handle) {
                Some(old_handle) if old_handle != handle => {
                    entries.by_handle.remove(&old_handle);
                    tracing::debug!(
                        user = %user_id,
                        old = %old_handle,
                        new = %handle,
                        "presence replaced"
                    );
                },
                _ => {},
            }
            entries.by_handle.insert(handle, user_id);

            (displaced, entries.recipients_except(user_id))
        };

        if let Some(previous) = displaced {
            self.broadcast(previous, PresenceStatus::Offline, &recipients);
        }
        self.broadcast(user_id, PresenceStatus::Online, &recipients);

        tracing::debug!(user = %user_id, %handle, "online");
    }

    /// Connection currently bound to `user_id`.
    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.lock().by_user.get(&user_id).copied()
    }

    /// Remove whichever user is bound to `handle` and announce it offline.
    ///
    /// Returns the removed user. `None` (no broadcast) when the handle never
    /// registered or was displaced by a newer connection; that is not an
    /// error.
    pub fn unregister(&self, handle: ConnectionHandle) -> Option<UserId> {
        let (user_id, recipients) = {
            let mut entries = self.lock();
            let user_id = entries.by_handle.remove(&handle)?;
            entries.by_user.remove(&user_id);
            (user_id, entries.recipients_except(user_id))
        };

        self.broadcast(user_id, PresenceStatus::Offline, &recipients);
        tracing::debug!(user = %user_id, %handle, "offline");

        Some(user_id)
    }

    /// Whether `user_id` has a live connection.
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.lock().by_user.contains_key(&user_id)
    }

    /// Number of online users.
    pub fn online_count(&self) -> usize {
        self.lock().by_user.len()
    }

    fn broadcast(&self, user_id: UserId, status: PresenceStatus, recipients: &[ConnectionHandle]) {
        for &handle in recipients {
            let event = PushEvent::Status(StatusChanged { user_id, status });
            if let Err(e) = self.transport.push(handle, event) {
                tracing::debug!(user = %user_id, %handle, error = %e, "status push dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::transport::RecordingTransport;

    fn user(byte: u8) -> UserId {
        UserId::from_random_bytes([byte; 16])
    }

    fn registry() -> (PresenceRegistry<RecordingTransport>, RecordingTransport) {
        let transport = RecordingTransport::new();
        (PresenceRegistry::new(Arc::new(transport.clone())), transport)
    }

    fn status(byte: u8, status: PresenceStatus) -> PushEvent {
        PushEvent::Status(StatusChanged { user_id: user(byte), status })
    }

    #[test]
    fn register_then_lookup() {
        let (registry, _) = registry();
        registry.register(user(1), ConnectionHandle(10));

        assert_eq!(registry.lookup(user(1)), Some(ConnectionHandle(10)));
        assert!(registry.is_online(user(1)));
        assert_eq!(registry.lookup(user(2)), None);
    }

    #[test]
    fn last_registration_wins() {
        let (registry, _) = registry();
        registry.register(user(1), ConnectionHandle(10));
        registry.register(user(1), ConnectionHandle(11));

        assert_eq!(registry.lookup(user(1)), Some(ConnectionHandle(11)));
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn displaced_connection_disconnect_is_ignored() {
        let (registry, transport) = registry();
        registry.register(user(1), ConnectionHandle(10));
        registry.register(user(2), ConnectionHandle(20));
        registry.register(user(1), ConnectionHandle(11));
        transport.clear();

        assert_eq!(registry.unregister(ConnectionHandle(10)), None);
        assert_eq!(registry.lookup(user(1)), Some(ConnectionHandle(11)));
        assert!(transport.pushes().is_empty());
    }

    #[test]
    fn online_broadcast_skips_the_new_user() {
        let (registry, transport) = registry();
        registry.register(user(1), ConnectionHandle(10));
        registry.register(user(2), ConnectionHandle(20));

        assert_eq!(
            transport.pushes_to(ConnectionHandle(10)),
            vec![status(2, PresenceStatus::Online)]
        );
        assert!(transport.pushes_to(ConnectionHandle(20)).is_empty());
    }

    #[test]
    fn unregister_broadcasts_offline_to_others() {
        let (registry, transport) = registry();
        registry.register(user(1), ConnectionHandle(10));
        registry.register(user(2), ConnectionHandle(20));
        transport.clear();

        assert_eq!(registry.unregister(ConnectionHandle(20)), Some(user(2)));
        assert_eq!(
            transport.pushes_to(ConnectionHandle(10)),
            vec![status(2, PresenceStatus::Offline)]
        );
        assert!(!registry.is_online(user(2)));
    }

    #[test]
    fn unknown_handle_unregister_is_silent() {
        let (registry, transport) = registry();
        registry.register(user(1), ConnectionHandle(10));
        transport.clear();

        assert_eq!(registry.unregister(ConnectionHandle(99)), None);
        assert!(transport.pushes().is_empty());
    }

    #[test]
    fn rebinding_a_handle_takes_previous_user_offline() {
        let (registry, transport) = registry();
        registry.register(user(1), ConnectionHandle(10));
        registry.register(user(3), ConnectionHandle(30));
        transport.clear();

        registry.register(user(2), ConnectionHandle(10));

        assert!(!registry.is_online(user(1)));
        assert_eq!(registry.lookup(user(2)), Some(ConnectionHandle(10)));
        assert_eq!(
            transport.pushes_to(ConnectionHandle(30)),
            vec![status(1, PresenceStatus::Offline), status(2, PresenceStatus::Online)]
        );
    }

    #[test]
    fn failed_broadcast_does_not_block_registration() {
        let (registry, transport) = registry();
        registry.register(user(1), ConnectionHandle(10));
        transport.fail_pushes(true);

        registry.register(user(2), ConnectionHandle(20));
        assert!(registry.is_online(user(2)));
    }

    #[test]
    fn concurrent_register_unregister_on_distinct_handles() {
        let (registry, _) = registry();

        // Even threads end registered, odd threads end unregistered.
        std::thread::scope(|scope| {
            for t in 0u8..8 {
                let registry = &registry;
                scope.spawn(move || {
                    let handle = ConnectionHandle(100 + u64::from(t));
                    for _ in 0..200 {
                        registry.register(user(t), handle);
                        assert_eq!(registry.lookup(user(t)), Some(handle));
                        assert_eq!(registry.unregister(handle), Some(user(t)));
                    }
                    if t % 2 == 0 {
                        registry.register(user(t), handle);
                    }
                });
            }
        });

        for t in 0u8..8 {
            let expected = (t % 2 == 0).then(|| ConnectionHandle(100 + u64::from(t)));
            assert_eq!(registry.lookup(user(t)), expected);
        }
        assert_eq!(registry.online_count(), 4);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(u8, u64),
        Unregister(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..4, 0u64..6).prop_map(|(u, h)| Op::Register(u, h)),
            (0u64..6).prop_map(Op::Unregister),
        ]
    }

    proptest! {
        #[test]
        fn matches_last_write_wins_model(ops in prop::collection::vec(op(), 0..64)) {
            let (registry, _) = registry();
            let mut model: HashMap<u8, u64> = HashMap::new();

            for op in ops {
                match op {
                    Op::Register(u, h) => {
                        model.retain(|other, handle| *other == u || *handle != h);
                        model.insert(u, h);
                        registry.register(user(u), ConnectionHandle(h));
                    },
                    Op::Unregister(h) => {
                        let expected = model.iter().find(|(_, handle)| **handle == h).map(|(u, _)| *u);
                        if let Some(u) = expected {
                            model.remove(&u);
                        }
                        prop_assert_eq!(registry.unregister(ConnectionHandle(h)), expected.map(user));
                    },
                }
            }

            for u in 0u8..4 {
                prop_assert_eq!(registry.lookup(user(u)), model.get(&u).copied().map(ConnectionHandle));
            }

            let handles: HashSet<u64> = model.values().copied().collect();
            prop_assert_eq!(handles.len(), model.len(), "a handle is bound to one user at most");
        }
    }
}
