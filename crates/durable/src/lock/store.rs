//! Distributed lock/counter store contract

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use uuid::Uuid;

use crate::clock::{after, Clock, SystemClock};

/// Error type for lock operations
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// Backend failure
    #[error("lock store error: {0}")]
    Backend(String),

    /// Stored state could not be decoded
    #[error("corrupt lock state for {key}: {message}")]
    Corrupt { key: String, message: String },

    /// The mutex guarding a release could not be obtained in time; the
    /// holder will expire on its own
    #[error("could not release overlap lock for {0}")]
    ReleaseContended(String),
}

/// Proof of holding a short-lived mutex
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutexToken {
    pub key: String,
    pub token: Uuid,
}

/// Key/value store with a short-lived mutual-exclusion primitive
#[async_trait]
pub trait LockStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Value>, LockError>;

    /// Store a value, expiring after `ttl` when given
    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), LockError>;

    async fn forget(&self, key: &str) -> Result<(), LockError>;

    /// Try to take the mutex `key` for at most `ttl`; `None` when held
    async fn try_mutex(&self, key: &str, ttl: Duration) -> Result<Option<MutexToken>, LockError>;

    /// Release a mutex taken with [`LockStore::try_mutex`]; a stale token
    /// is ignored
    async fn release_mutex(&self, token: MutexToken) -> Result<(), LockError>;
}

struct Expiring<T> {
    value: T,
    expires_at: Option<DateTime<Utc>>,
}

impl<T> Expiring<T> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-memory lock store backed by [`DashMap`]
pub struct InMemoryLockStore {
    values: DashMap<String, Expiring<Value>>,
    mutexes: DashMap<String, Expiring<Uuid>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            values: DashMap::new(),
            mutexes: DashMap::new(),
            clock,
        }
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, LockError> {
        let now = self.clock.now();
        Ok(self
            .values
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), LockError> {
        let expires_at = ttl.map(|ttl| after(self.clock.now(), ttl));
        self.values
            .insert(key.to_string(), Expiring { value, expires_at });
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<(), LockError> {
        self.values.remove(key);
        Ok(())
    }

    async fn try_mutex(&self, key: &str, ttl: Duration) -> Result<Option<MutexToken>, LockError> {
        let now = self.clock.now();
        let token = Uuid::now_v7();
        let fresh = Expiring {
            value: token,
            expires_at: Some(after(now, ttl)),
        };

        match self.mutexes.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if held.get().is_live(now) {
                    return Ok(None);
                }
                held.insert(fresh);
            }
            Entry::Vacant(slot) => {
                slot.insert(fresh);
            }
        }

        Ok(Some(MutexToken {
            key: key.to_string(),
            token,
        }))
    }

    async fn release_mutex(&self, token: MutexToken) -> Result<(), LockError> {
        self.mutexes
            .remove_if(&token.key, |_, held| held.value == token.token);
        Ok(())
    }
}
