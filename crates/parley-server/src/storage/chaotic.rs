//! Chaotic storage wrapper for fault injection testing
//!
//! Randomly fails storage and directory calls so tests can check that a failed
//! persist never turns into a delivery and never corrupts history.

use std::sync::{Arc, Mutex};

use parley_proto::{EncryptedMessage, MessageId, StoredMessage, UserId};

use super::{Directory, Storage, StorageError, UserRecord};

/// Chaotic storage wrapper that randomly injects failures
///
/// Delegates to an underlying backend but fails operations based on a
/// configured failure rate. Injected failures are `StorageError::Io`, so they
/// read as transient to callers.
#[derive(Clone)]
pub struct ChaoticStorage<S> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
    operation_count: Arc<Mutex<usize>>,
}

/// Linear congruential generator, reproducible from its seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }
}

impl<S> ChaoticStorage<S> {
    /// Wrap `inner` with the default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with explicit seed for reproducible chaos
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0]
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self {
            inner,
            failure_rate,
            rng: Arc::new(Mutex::new(ChaoticRng::new(seed))),
            operation_count: Arc::new(Mutex::new(0)),
        }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total number of calls attempted, failed or not.
    pub fn operation_count(&self) -> usize {
        #[allow(clippy::expect_used)]
        *self.operation_count.lock().expect("invariant: operation_count mutex poisoned")
    }

    /// Count the call and decide whether it fails.
    fn inject(&self) -> Result<(), StorageError> {
        #[allow(clippy::expect_used)]
        {
            *self.operation_count.lock().expect("invariant: operation_count mutex poisoned") += 1;
        }

        #[allow(clippy::expect_used)]
        let roll = self.rng.lock().expect("invariant: ChaoticRng mutex poisoned").next();

        if roll < self.failure_rate {
            return Err(StorageError::Io("chaotic failure injection".to_string()));
        }
        Ok(())
    }
}

impl<S: Storage> Storage for ChaoticStorage<S> {
    fn insert_message(
        &self,
        id: MessageId,
        message: EncryptedMessage,
    ) -> Result<StoredMessage, StorageError> {
        self.inject()?;
        self.inner.insert_message(id, message)
    }

    fn messages_between(&self, a: UserId, b: UserId) -> Result<Vec<StoredMessage>, StorageError> {
        self.inject()?;
        self.inner.messages_between(a, b)
    }
}

impl<S: Directory> Directory for ChaoticStorage<S> {
    fn register_user(&self, record: UserRecord) -> Result<(), StorageError> {
        self.inject()?;
        self.inner.register_user(record)
    }

    fn user(&self, user_id: UserId) -> Result<UserRecord, StorageError> {
        self.inject()?;
        self.inner.user(user_id)
    }

    fn list_users(&self) -> Result<Vec<UserRecord>, StorageError> {
        self.inject()?;
        self.inner.list_users()
    }
}
