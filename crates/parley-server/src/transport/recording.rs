//! In-memory transport that records pushes.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};

use super::{ConnectionHandle, LiveTransport, PushError, PushEvent};

/// Transport double for relay and presence tests.
///
/// Records every accepted push. Can be switched into a failing mode where
/// every push returns [`PushError::Closed`] and nothing is recorded, which
/// models a connection that dropped between lookup and push.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pushes: Arc<Mutex<Vec<(ConnectionHandle, PushEvent)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    /// Empty recorder that accepts every push.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent pushes fail (or succeed again).
    pub fn fail_pushes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(ConnectionHandle, PushEvent)>> {
        #[allow(clippy::expect_used)]
        self.pushes.lock().expect("invariant: recording mutex poisoned")
    }

    /// Every recorded push, oldest first.
    pub fn pushes(&self) -> Vec<(ConnectionHandle, PushEvent)> {
        self.lock().clone()
    }

    /// Events recorded for one connection, oldest first.
    pub fn pushes_to(&self, handle: ConnectionHandle) -> Vec<PushEvent> {
        self.lock().iter().filter(|(h, _)| *h == handle).map(|(_, e)| e.clone()).collect()
    }

    /// Forget recorded pushes.
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl LiveTransport for RecordingTransport {
    fn push(&self, handle: ConnectionHandle, event: PushEvent) -> Result<(), PushError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PushError::Closed);
        }

        self.lock().push((handle, event));
        Ok(())
    }
}
