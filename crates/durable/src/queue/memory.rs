//! In-memory implementation of MessageQueue for testing

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

use super::{Delivery, EnqueueOptions, MessageQueue, QueueError, QueueMessage};
use crate::clock::{after, Clock, SystemClock};

/// SQS ceiling for delayed delivery
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(900);

/// How long a received message stays invisible before it is redelivered
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(300);

struct StoredMessage {
    id: Uuid,
    message: QueueMessage,
    queue: String,
    unique_key: Option<String>,
    visible_at: DateTime<Utc>,
    attempt: u32,
}

#[derive(Default)]
struct QueueState {
    /// Keyed by enqueue order
    messages: BTreeMap<u64, StoredMessage>,
    by_id: HashMap<Uuid, u64>,
    unique_keys: HashMap<String, Uuid>,
    next_seq: u64,
}

impl QueueState {
    fn stored_mut(&mut self, id: Uuid) -> Result<&mut StoredMessage, QueueError> {
        let seq = *self.by_id.get(&id).ok_or(QueueError::UnknownDelivery(id))?;
        self.messages
            .get_mut(&seq)
            .ok_or(QueueError::UnknownDelivery(id))
    }
}

/// In-memory queue with delays, unique keys and visibility timeouts
///
/// Time comes from the injected [`Clock`], so a
/// [`ManualClock`](crate::ManualClock) makes delayed messages deliverable
/// without sleeping.
pub struct InMemoryMessageQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
    max_delay: Duration,
    visibility_timeout: Duration,
}

impl InMemoryMessageQueue {
    /// Create a queue on the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a queue on `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            clock,
            max_delay: DEFAULT_MAX_DELAY,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Override the maximum delay
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Override the visibility timeout
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Number of messages queued or in flight
    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all queued messages, in enqueue order
    pub fn messages(&self) -> Vec<QueueMessage> {
        self.state
            .lock()
            .messages
            .values()
            .map(|stored| stored.message.clone())
            .collect()
    }

    /// Earliest instant any message becomes visible
    pub fn next_visible_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .messages
            .values()
            .map(|stored| stored.visible_at)
            .min()
    }

    fn capped(&self, delay: Duration) -> Duration {
        if delay > self.max_delay {
            warn!(?delay, max_delay = ?self.max_delay, "delay exceeds transport maximum, capping");
            self.max_delay
        } else {
            delay
        }
    }
}

impl Default for InMemoryMessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn enqueue(
        &self,
        message: QueueMessage,
        options: EnqueueOptions,
    ) -> Result<bool, QueueError> {
        let visible_at = after(self.clock.now(), self.capped(options.delay));
        let mut state = self.state.lock();

        if let Some(key) = &options.unique_key {
            if state.unique_keys.contains_key(key) {
                return Ok(false);
            }
        }

        let id = Uuid::now_v7();
        let seq = state.next_seq;
        state.next_seq += 1;

        if let Some(key) = &options.unique_key {
            state.unique_keys.insert(key.clone(), id);
        }
        state.by_id.insert(id, seq);
        state.messages.insert(
            seq,
            StoredMessage {
                id,
                message,
                queue: options.routing.queue_name().to_string(),
                unique_key: options.unique_key,
                visible_at,
                attempt: 0,
            },
        );

        Ok(true)
    }

    async fn receive(&self, queue: &str, max: usize) -> Result<Vec<Delivery>, QueueError> {
        let now = self.clock.now();
        let invisible_until = after(now, self.visibility_timeout);
        let mut state = self.state.lock();

        let deliveries = state
            .messages
            .values_mut()
            .filter(|stored| stored.queue == queue && stored.visible_at <= now)
            .take(max)
            .map(|stored| {
                stored.attempt += 1;
                stored.visible_at = invisible_until;
                Delivery {
                    id: stored.id,
                    message: stored.message.clone(),
                    queue: stored.queue.clone(),
                    attempt: stored.attempt,
                }
            })
            .collect();

        Ok(deliveries)
    }

    async fn ack(&self, delivery_id: Uuid) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let seq = state
            .by_id
            .remove(&delivery_id)
            .ok_or(QueueError::UnknownDelivery(delivery_id))?;

        if let Some(stored) = state.messages.remove(&seq) {
            if let Some(key) = stored.unique_key {
                state.unique_keys.remove(&key);
            }
        }
        Ok(())
    }

    async fn release(&self, delivery_id: Uuid, delay: Duration) -> Result<(), QueueError> {
        let visible_at = after(self.clock.now(), self.capped(delay));
        let mut state = self.state.lock();
        state.stored_mut(delivery_id)?.visible_at = visible_at;
        Ok(())
    }

    async fn reschedule(
        &self,
        delivery_id: Uuid,
        message: QueueMessage,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let visible_at = after(self.clock.now(), self.capped(delay));
        let mut state = self.state.lock();
        let stored = state.stored_mut(delivery_id)?;
        stored.message = message;
        stored.visible_at = visible_at;
        Ok(())
    }

    fn max_delay(&self) -> Duration {
        self.max_delay
    }
}
