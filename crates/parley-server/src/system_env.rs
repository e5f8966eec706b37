//! Production Environment implementation using the system clock and OS RNG.

use chrono::{DateTime, Utc};

use crate::env::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A relay without working randomness would hand
/// out predictable user and message ids, so there is nothing sensible to fall
/// back to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - server cannot operate securely");
    }

    fn wall_clock(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
