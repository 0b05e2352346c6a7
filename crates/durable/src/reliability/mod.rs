//! Reliability policies for activity execution

mod retry;

pub(crate) use retry::duration_millis;
pub use retry::RetryPolicy;
