//! MessageQueue trait definition

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use super::{Delivery, EnqueueOptions, QueueMessage};

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The delivery is unknown or no longer owned by the receiver
    #[error("unknown delivery: {0}")]
    UnknownDelivery(Uuid),

    /// Transport failure
    #[error("queue transport error: {0}")]
    Transport(String),
}

/// At-least-once queue transport the engine dispatches work through
#[async_trait]
pub trait MessageQueue: Send + Sync + 'static {
    /// Enqueue a message
    ///
    /// Returns `false` when a message with the same unique key is already
    /// queued or in flight and nothing was enqueued.
    async fn enqueue(&self, message: QueueMessage, options: EnqueueOptions)
        -> Result<bool, QueueError>;

    /// Receive up to `max` visible messages from `queue`
    async fn receive(&self, queue: &str, max: usize) -> Result<Vec<Delivery>, QueueError>;

    /// Remove a delivered message
    async fn ack(&self, delivery_id: Uuid) -> Result<(), QueueError>;

    /// Make a delivered message visible again after `delay`
    async fn release(&self, delivery_id: Uuid, delay: Duration) -> Result<(), QueueError>;

    /// Replace a delivered message's payload and make it visible after
    /// `delay`, keeping its unique key
    async fn reschedule(
        &self,
        delivery_id: Uuid,
        message: QueueMessage,
        delay: Duration,
    ) -> Result<(), QueueError>;

    /// Longest delay the transport accepts
    fn max_delay(&self) -> Duration;
}
