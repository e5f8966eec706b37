//! Outbound queues for live connections.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use parley_proto::Frame;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::{ConnectionHandle, LiveTransport, PushError, PushEvent};

/// Per-connection outbound queues.
///
/// Each attached connection owns a bounded channel drained by a writer task
/// that serializes frames onto the connection's single outbound stream, so
/// replies and pushes reach a client in the order they were enqueued.
///
/// Pushes use `try_send` and fail with [`PushError::Full`] rather than wait on
/// a slow reader. Replies wait for capacity.
pub struct ConnectionHub {
    outbound: Mutex<HashMap<ConnectionHandle, mpsc::Sender<Frame>>>,
    capacity: usize,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHub {
    /// Queue depth used by [`ConnectionHub::new`].
    pub const DEFAULT_CAPACITY: usize = 1024;

    /// Empty hub with the default queue depth.
    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    /// Empty hub with `capacity` frames of queue per connection.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { outbound: Mutex::new(HashMap::new()), capacity: capacity.max(1) }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionHandle, mpsc::Sender<Frame>>> {
        #[allow(clippy::expect_used)]
        self.outbound.lock().expect("invariant: connection hub mutex poisoned")
    }

    /// Attach a connection. The returned receiver yields every frame queued
    /// for it until [`ConnectionHub::detach`] is called.
    ///
    /// Attaching an already attached handle replaces its queue.
    pub fn attach(&self, handle: ConnectionHandle) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(self.capacity);
        self.lock().insert(handle, tx);
        rx
    }

    /// Detach a connection. Its receiver ends once queued frames drain.
    pub fn detach(&self, handle: ConnectionHandle) {
        self.lock().remove(&handle);
    }

    /// Number of attached connections.
    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn sender(&self, handle: ConnectionHandle) -> Option<mpsc::Sender<Frame>> {
        self.lock().get(&handle).cloned()
    }

    /// Queue a reply frame, waiting for capacity.
    ///
    /// # Errors
    ///
    /// - `PushError::Closed` if the connection is not attached
    pub async fn reply(&self, handle: ConnectionHandle, frame: Frame) -> Result<(), PushError> {
        let sender = self.sender(handle).ok_or(PushError::Closed)?;
        sender.send(frame).await.map_err(|_| PushError::Closed)
    }
}

impl LiveTransport for ConnectionHub {
    fn push(&self, handle: ConnectionHandle, event: PushEvent) -> Result<(), PushError> {
        let frame =
            event.into_payload().into_frame(0).map_err(|e| PushError::Encode(e.to_string()))?;
        let sender = self.sender(handle).ok_or(PushError::Closed)?;

        sender.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full,
            TrySendError::Closed(_) => PushError::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use parley_proto::{Opcode, PresenceStatus, UserId, replies::StatusChanged};

    use super::*;

    fn status(byte: u8) -> PushEvent {
        PushEvent::Status(StatusChanged {
            user_id: UserId::from_random_bytes([byte; 16]),
            status: PresenceStatus::Online,
        })
    }

    #[tokio::test]
    async fn push_reaches_attached_connection() {
        let hub = ConnectionHub::new();
        let mut rx = hub.attach(ConnectionHandle(1));

        hub.push(ConnectionHandle(1), status(7)).unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.opcode(), Some(Opcode::StatusChanged));
        assert_eq!(frame.request_id(), 0);
    }

    #[test]
    fn push_to_unknown_connection_is_closed() {
        let hub = ConnectionHub::new();
        assert_eq!(hub.push(ConnectionHandle(9), status(1)), Err(PushError::Closed));
    }

    #[test]
    fn full_queue_rejects_push() {
        let hub = ConnectionHub::with_capacity(1);
        let _rx = hub.attach(ConnectionHandle(1));

        hub.push(ConnectionHandle(1), status(1)).unwrap();
        assert_eq!(hub.push(ConnectionHandle(1), status(2)), Err(PushError::Full));
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let hub = ConnectionHub::new();
        drop(hub.attach(ConnectionHandle(1)));
        assert_eq!(hub.push(ConnectionHandle(1), status(1)), Err(PushError::Closed));
    }

    #[tokio::test]
    async fn replies_and_pushes_keep_order() {
        let hub = ConnectionHub::new();
        let mut rx = hub.attach(ConnectionHandle(1));

        hub.push(ConnectionHandle(1), status(1)).unwrap();
        let ack = parley_proto::Payload::Ack.into_frame(42).unwrap();
        hub.reply(ConnectionHandle(1), ack).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().opcode(), Some(Opcode::StatusChanged));
        assert_eq!(rx.recv().await.unwrap().request_id(), 42);
    }

    #[tokio::test]
    async fn detach_ends_receiver() {
        let hub = ConnectionHub::new();
        let mut rx = hub.attach(ConnectionHandle(1));
        hub.detach(ConnectionHandle(1));

        assert!(rx.recv().await.is_none());
        assert_eq!(hub.connection_count(), 0);
    }
}
