//! Activity trait and error type

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::ActivityContext;

/// Error type for activity failures
///
/// Retryable failures go back to the queue under the activity's
/// [`RetryPolicy`](crate::RetryPolicy). Non-retryable ones (and retryable
/// ones that ran out of attempts) are logged as the step's outcome and
/// surface in the workflow as `Err(ActivityError)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether another attempt may succeed
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<serde_json::Value>,
}

impl ActivityError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    /// Set the error type
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    /// Add error details
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.error_type {
            Some(error_type) => write!(f, "{} ({})", self.message, error_type),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(format!("{err:#}"))
    }
}

/// Malformed input or output never gets better on retry
impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        Self::non_retryable(err.to_string()).with_type("SERIALIZATION")
    }
}

/// A unit of non-deterministic work dispatched from a workflow step
///
/// Activities run outside the workflow procedure, on whichever worker
/// receives the queue message, and may run more than once: an attempt can
/// be retried, and delivery is at-least-once. Make them idempotent.
///
/// # Example
///
/// ```ignore
/// use replayflow_durable::prelude::*;
///
/// struct ChargeCard;
///
/// #[async_trait]
/// impl Activity for ChargeCard {
///     const TYPE: &'static str = "charge_card";
///     type Input = ChargeRequest;
///     type Output = Receipt;
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: Self::Input,
///     ) -> Result<Self::Output, ActivityError> {
///         let key = ctx.idempotency_key();
///         // charge with `key` so retries are safe...
///     }
/// }
/// ```
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Unique type identifier, used as the registry key
    const TYPE: &'static str;

    /// Input type for the activity
    type Input: Serialize + DeserializeOwned + Send;

    /// Output type for the activity
    type Output: Serialize + DeserializeOwned + Send;

    /// Execute one attempt
    ///
    /// # Errors
    ///
    /// Return `ActivityError::retryable()` for transient failures that should be retried.
    /// Return `ActivityError::non_retryable()` for permanent failures.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}
