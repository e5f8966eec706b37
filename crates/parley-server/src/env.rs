//! Environment abstraction for deterministic testing.
//!
//! Decouples relay logic from system resources (wall clock, randomness) so
//! tests can pin ids and timestamps while production uses the OS.

use chrono::{DateTime, Utc};
use parley_proto::{MessageId, UserId};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - Methods are infallible except in exceptional circumstances (OS entropy
///   exhaustion)
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Current wall-clock time.
    ///
    /// Not required to be monotonic; storage keeps message timestamps strictly
    /// increasing on its own.
    fn wall_clock(&self) -> DateTime<Utc>;

    /// Generates a random `u64`.
    ///
    /// Used for connection handles.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Fresh random user id.
    fn new_user_id(&self) -> UserId {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        UserId::from_random_bytes(bytes)
    }

    /// Fresh random message id.
    fn new_message_id(&self) -> MessageId {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        MessageId::from_random_bytes(bytes)
    }
}
