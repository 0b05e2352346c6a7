//! Overlap lock preventing concurrent re-entrant execution

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::{LockError, LockStore};
use crate::clock::{after, Clock};

/// Overlap lock key prefix
pub const OVERLAP_PREFIX: &str = "__overlap:";

/// Key holding the semaphore state of a workflow
pub fn overlap_key(workflow_id: Uuid) -> String {
    format!("{OVERLAP_PREFIX}{workflow_id}")
}

fn mutex_key(workflow_id: Uuid) -> String {
    format!("{OVERLAP_PREFIX}{workflow_id}:mutex")
}

/// Who is asking for the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockClass {
    /// Workflow invocation; exclusive
    Workflow,

    /// Activity attempt; shared with other activities, excluded by a
    /// workflow holder
    Activity,
}

/// Tunables of the overlap lock
#[derive(Debug, Clone)]
pub struct OverlapLockConfig {
    /// Lifetime of the mutex guarding each compare-and-set
    pub mutex_ttl: Duration,

    /// Lifetime of a holder that never releases (crashed worker)
    pub holder_ttl: Duration,

    /// Attempts to take the mutex when releasing
    pub release_attempts: u32,

    /// Base backoff between release attempts
    pub release_backoff: Duration,
}

impl Default for OverlapLockConfig {
    fn default() -> Self {
        Self {
            mutex_ttl: Duration::from_secs(5),
            holder_ttl: Duration::from_secs(15 * 60),
            release_attempts: 20,
            release_backoff: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Holder {
    id: String,
    expires_at: DateTime<Utc>,
}

/// Persisted semaphore value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct SemaphoreState {
    workflow: Option<Holder>,
    activities: Vec<Holder>,
}

impl SemaphoreState {
    fn prune(&mut self, now: DateTime<Utc>) {
        if self.workflow.as_ref().is_some_and(|h| h.expires_at <= now) {
            self.workflow = None;
        }
        self.activities.retain(|h| h.expires_at > now);
    }

    fn is_empty(&self) -> bool {
        self.workflow.is_none() && self.activities.is_empty()
    }

    fn admits(&self, class: LockClass) -> bool {
        match class {
            LockClass::Workflow => self.is_empty(),
            LockClass::Activity => self.workflow.is_none(),
        }
    }

    fn add(&mut self, class: LockClass, holder: Holder) {
        match class {
            LockClass::Workflow => self.workflow = Some(holder),
            LockClass::Activity => self.activities.push(holder),
        }
    }

    fn remove(&mut self, class: LockClass, holder_id: &str) {
        match class {
            LockClass::Workflow => {
                if self.workflow.as_ref().is_some_and(|h| h.id == holder_id) {
                    self.workflow = None;
                }
            }
            LockClass::Activity => self.activities.retain(|h| h.id != holder_id),
        }
    }
}

/// A successful acquisition; hand it back to [`OverlapLock::release`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "an overlap lock guard must be released"]
pub struct LockGuard {
    pub workflow_id: Uuid,
    pub class: LockClass,
    pub holder_id: String,
}

/// Non-blocking distributed lock keyed by workflow id
///
/// The state is a small JSON semaphore in the [`LockStore`]; every
/// read-modify-write of it happens under the store's short-lived mutex.
/// A failed acquisition returns `None` and the caller reschedules itself.
#[derive(Clone)]
pub struct OverlapLock {
    store: Arc<dyn LockStore>,
    clock: Arc<dyn Clock>,
    config: OverlapLockConfig,
}

impl OverlapLock {
    pub fn new(
        store: Arc<dyn LockStore>,
        clock: Arc<dyn Clock>,
        config: OverlapLockConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Try to acquire the lock once
    pub async fn acquire(
        &self,
        workflow_id: Uuid,
        class: LockClass,
        holder_id: impl Into<String>,
    ) -> Result<Option<LockGuard>, LockError> {
        let holder_id = holder_id.into();
        let Some(token) = self
            .store
            .try_mutex(&mutex_key(workflow_id), self.config.mutex_ttl)
            .await?
        else {
            debug!(%workflow_id, ?class, "overlap mutex busy");
            return Ok(None);
        };

        let result = self.admit(workflow_id, class, &holder_id).await;
        self.store.release_mutex(token).await?;

        let admitted = result?;
        if !admitted {
            debug!(%workflow_id, ?class, "overlap lock held elsewhere");
        }

        Ok(admitted.then_some(LockGuard {
            workflow_id,
            class,
            holder_id,
        }))
    }

    /// Release a held lock, spinning on the mutex with backoff
    pub async fn release(&self, guard: LockGuard) -> Result<(), LockError> {
        let key = mutex_key(guard.workflow_id);

        for attempt in 0..self.config.release_attempts {
            if let Some(token) = self.store.try_mutex(&key, self.config.mutex_ttl).await? {
                let result = self.evict(&guard).await;
                self.store.release_mutex(token).await?;
                return result;
            }

            tokio::time::sleep(self.config.release_backoff * (attempt + 1)).await;
        }

        warn!(
            workflow_id = %guard.workflow_id,
            class = ?guard.class,
            "overlap lock release contended, leaving holder to expire"
        );
        Err(LockError::ReleaseContended(guard.workflow_id.to_string()))
    }

    async fn load(&self, workflow_id: Uuid) -> Result<SemaphoreState, LockError> {
        let key = overlap_key(workflow_id);
        let mut state = match self.store.get(&key).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| LockError::Corrupt {
                key,
                message: e.to_string(),
            })?,
            None => SemaphoreState::default(),
        };
        state.prune(self.clock.now());
        Ok(state)
    }

    async fn save(&self, workflow_id: Uuid, state: &SemaphoreState) -> Result<(), LockError> {
        let key = overlap_key(workflow_id);
        if state.is_empty() {
            return self.store.forget(&key).await;
        }

        let value = serde_json::to_value(state).map_err(|e| LockError::Corrupt {
            key: key.clone(),
            message: e.to_string(),
        })?;
        self.store
            .put(&key, value, Some(self.config.holder_ttl))
            .await
    }

    async fn admit(
        &self,
        workflow_id: Uuid,
        class: LockClass,
        holder_id: &str,
    ) -> Result<bool, LockError> {
        let mut state = self.load(workflow_id).await?;
        if !state.admits(class) {
            return Ok(false);
        }

        state.add(
            class,
            Holder {
                id: holder_id.to_string(),
                expires_at: after(self.clock.now(), self.config.holder_ttl),
            },
        );
        self.save(workflow_id, &state).await?;
        Ok(true)
    }

    async fn evict(&self, guard: &LockGuard) -> Result<(), LockError> {
        let mut state = self.load(guard.workflow_id).await?;
        state.remove(guard.class, &guard.holder_id);
        self.save(guard.workflow_id, &state).await
    }
}
