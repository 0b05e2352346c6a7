//! Activity calls and their options

use serde::{Deserialize, Serialize};

use crate::activity::Activity;
use crate::queue::Routing;
use crate::reliability::RetryPolicy;

/// Options for activity execution
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy for this activity
    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Queue routing override; the workflow's own routing when unset
    #[serde(default)]
    pub routing: Routing,
}

impl ActivityOptions {
    /// Create options with a specific retry policy
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Route the activity to a specific queue
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.routing.queue = Some(queue.into());
        self
    }

    /// Route the activity to a specific connection
    pub fn on_connection(mut self, connection: impl Into<String>) -> Self {
        self.routing.connection = Some(connection.into());
        self
    }
}

/// A type-erased activity invocation
///
/// Used wherever calls are collected before they run: fan-out through
/// [`WorkflowContext::all`](crate::engine::WorkflowContext::all) and saga
/// compensations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityCall {
    /// Registered activity type
    pub activity_type: String,

    /// Serialized input
    pub input: serde_json::Value,

    /// Execution options
    pub options: ActivityOptions,
}

impl ActivityCall {
    /// Build a call from raw parts
    pub fn new(activity_type: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            activity_type: activity_type.into(),
            input,
            options: ActivityOptions::default(),
        }
    }

    /// Build a call to a typed activity
    pub fn of<A: Activity>(input: &A::Input) -> Result<Self, serde_json::Error> {
        Ok(Self::new(A::TYPE, serde_json::to_value(input)?))
    }

    /// Replace the execution options
    pub fn with_options(mut self, options: ActivityOptions) -> Self {
        self.options = options;
        self
    }

    /// Log discriminator for the step this call resolves
    pub(crate) fn kind(&self) -> String {
        format!("activity:{}", self.activity_type)
    }
}
