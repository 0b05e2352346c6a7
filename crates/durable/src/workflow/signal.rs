//! Workflow signals for external communication

use serde::{Deserialize, Serialize};

/// An asynchronous, fire-and-forget input to a workflow
///
/// Signals are journaled per workflow in receipt order. Every invocation
/// feeds them to [`Workflow::on_signal`](super::Workflow::on_signal) again,
/// so the fields they mutate are rebuilt identically on each replay.
///
/// # Example
///
/// ```
/// use replayflow_durable::WorkflowSignal;
///
/// let signal = WorkflowSignal::new("approve", serde_json::json!({ "by": "ops" }));
/// assert_eq!(signal.name, "approve");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSignal {
    /// Handler name the signal is addressed to
    pub name: String,

    /// Handler arguments (JSON)
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl WorkflowSignal {
    /// Create a new signal
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Create a signal without arguments
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, serde_json::Value::Null)
    }

    /// Create a cancellation signal
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::new(
            signal_names::CANCEL,
            serde_json::json!({ "reason": reason.into() }),
        )
    }

    /// Check if this is a cancellation signal
    pub fn is_cancel(&self) -> bool {
        self.name == signal_names::CANCEL
    }

    /// Decode the payload into a typed value
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Common signal names
pub mod signal_names {
    /// Ask the workflow to stop at its next `await`
    pub const CANCEL: &str = "cancel";
}
