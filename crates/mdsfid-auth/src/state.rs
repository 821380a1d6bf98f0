//! Single-use state storage for the authorization redirect.
//!
//! The state value binds an authorization redirect to its callback. It lives
//! only inside a [`StateStore`] under one well-known key, from the moment the
//! login starts until the first callback pulls it.
//!
//! # Atomicity
//!
//! `pull` must read and delete in one step. Two replayed callbacks racing for
//! the same key must not both observe the value. For SQL backends this is a
//! `DELETE ... RETURNING value`; for Redis a `GETDEL`.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngCore;
use rand::rngs::OsRng;

use crate::AuthResult;

/// Key under which the orchestrator stores the state by default.
pub const DEFAULT_STATE_KEY: &str = "auth_state";

/// Number of random bytes in a state value (128 bits).
pub const STATE_BYTES: usize = 16;

/// Storage trait for the per-handshake state slot.
///
/// Implementations are usually backed by the consuming application's session.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Stores `value` under `key`, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn put(&self, key: &str, value: &str) -> AuthResult<()>;

    /// Returns and clears the value under `key` in one atomic step.
    ///
    /// Returns `None` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn pull(&self, key: &str) -> AuthResult<Option<String>>;
}

/// Process-local [`StateStore`] for tests and single-instance deployments.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    slots: DashMap<String, String>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if no slot is occupied.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn put(&self, key: &str, value: &str) -> AuthResult<()> {
        self.slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn pull(&self, key: &str) -> AuthResult<Option<String>> {
        Ok(self.slots.remove(key).map(|(_, value)| value))
    }
}

/// Generates a new state value: 128 random bits from the OS CSPRNG,
/// hex-encoded (32 characters).
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; STATE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
