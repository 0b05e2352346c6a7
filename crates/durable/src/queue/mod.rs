//! Queue transport contract
//!
//! The engine never runs its own durable queue; it dispatches through a
//! [`MessageQueue`] with at-least-once delivery, delays and per-key
//! uniqueness. [`InMemoryMessageQueue`] implements it for tests.

mod memory;
mod message;
mod transport;

pub use memory::{InMemoryMessageQueue, DEFAULT_MAX_DELAY, DEFAULT_VISIBILITY_TIMEOUT};
pub use message::{
    ActivityTask, Delivery, EnqueueOptions, QueueMessage, Routing, DEFAULT_QUEUE,
};
pub use transport::{MessageQueue, QueueError};
