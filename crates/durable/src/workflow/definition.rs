//! Workflow trait definition

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use super::WorkflowSignal;
use crate::activity::ActivityError;
use crate::engine::WorkflowContext;
use crate::persistence::StoreError;
use crate::queue::QueueError;

/// Well-known [`WorkflowError`] codes produced by the engine itself
pub mod error_codes {
    /// A logged version falls outside the supported range
    pub const VERSION_NOT_SUPPORTED: &str = "VERSION_NOT_SUPPORTED";

    /// Input, output or a logged value could not be (de)serialized
    pub const SERIALIZATION: &str = "SERIALIZATION";

    /// The procedure exceeded the per-invocation step limit
    pub const STEP_LIMIT: &str = "STEP_LIMIT";

    /// A child workflow failed without leaving an exception record
    pub const CHILD_FAILED: &str = "CHILD_FAILED";
}

/// Error type for workflow failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Error message
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,

    /// Whether this error is retryable
    pub retryable: bool,
}

impl WorkflowError {
    /// Create a new workflow error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: false,
        }
    }

    /// Create a retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            retryable: true,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// A logged version no longer fits the code's supported window
    pub fn version_not_supported(change_id: &str, version: i32, min: i32, max: i32) -> Self {
        Self::new(format!(
            "version {version} of change `{change_id}` is not supported (supported: {min}..={max})"
        ))
        .with_code(error_codes::VERSION_NOT_SUPPORTED)
    }

    /// Check the error code
    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

impl From<ActivityError> for WorkflowError {
    fn from(err: ActivityError) -> Self {
        Self {
            message: err.message,
            code: err.error_type,
            retryable: err.retryable,
        }
    }
}

impl From<WorkflowError> for ActivityError {
    fn from(err: WorkflowError) -> Self {
        Self {
            message: err.message,
            error_type: err.code,
            retryable: err.retryable,
            details: None,
        }
    }
}

/// Why a workflow procedure stopped before returning its output
///
/// Every primitive on [`WorkflowContext`] returns `Result<_, Halt>`, so
/// procedures propagate suspension with `?` exactly like an error.
#[derive(Debug, thiserror::Error)]
pub enum Halt {
    /// The procedure reached a step without a recorded outcome; the
    /// invocation ends and the workflow waits for the next message
    #[error("workflow suspended")]
    Suspended,

    /// Deterministic failure; the workflow moves to `failed`
    #[error("workflow failed: {0}")]
    Failed(WorkflowError),

    /// Storage failure; the invocation is retried by the queue
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Transport failure; the invocation is retried by the queue
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl Halt {
    /// Check if this is a suspension
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended)
    }

    /// Shorthand for a deterministic failure
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Failed(WorkflowError::new(message))
    }
}

impl From<WorkflowError> for Halt {
    fn from(err: WorkflowError) -> Self {
        Self::Failed(err)
    }
}

impl From<ActivityError> for Halt {
    fn from(err: ActivityError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<serde_json::Error> for Halt {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(WorkflowError::new(err.to_string()).with_code(error_codes::SERIALIZATION))
    }
}

/// A workflow is a procedure that is re-run from its first statement on
/// every invocation
///
/// The procedure may only observe non-deterministic state through the
/// primitives on [`WorkflowContext`] (activities, children, timers,
/// conditions, side effects, versions). Each primitive consumes one step
/// index; already-resolved steps are answered from the event log, the
/// first unresolved one returns [`Halt::Suspended`].
///
/// Signal-mutable fields live in [`Workflow::State`]. Signals are applied
/// through [`Workflow::on_signal`] in receipt order while the procedure is
/// replayed, and queries read the same state through [`Workflow::query`].
///
/// # Example
///
/// ```ignore
/// use replayflow_durable::prelude::*;
///
/// #[derive(Default)]
/// struct OrderState {
///     canceled: bool,
/// }
///
/// struct OrderWorkflow;
///
/// #[async_trait]
/// impl Workflow for OrderWorkflow {
///     const TYPE: &'static str = "order_workflow";
///     type Input = String;
///     type Output = String;
///     type State = OrderState;
///
///     async fn execute(
///         ctx: &mut WorkflowContext<OrderState>,
///         order_id: String,
///     ) -> Result<String, Halt> {
///         let receipt = ctx.activity::<ChargeCard>(order_id).await??;
///         ctx.await_condition(|s| s.canceled).await?;
///         Ok(receipt)
///     }
///
///     fn on_signal(state: &mut OrderState, signal: &WorkflowSignal) {
///         if signal.is_cancel() {
///             state.canceled = true;
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier for this workflow
    ///
    /// Stored with every instance and used to look the procedure up in the
    /// registry; it must stay stable across deployments.
    const TYPE: &'static str;

    /// Input type for starting the workflow
    type Input: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Output type when workflow completes successfully
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Signal-mutable state, rebuilt from the signal journal on every run
    type State: Default + Send + Sync + 'static;

    /// Run the procedure from its first statement
    async fn execute(
        ctx: &mut WorkflowContext<Self::State>,
        input: Self::Input,
    ) -> Result<Self::Output, Halt>;

    /// Apply one signal to the state
    ///
    /// Must be deterministic: it runs again on every replay.
    fn on_signal(state: &mut Self::State, signal: &WorkflowSignal) {
        let _ = (state, signal);
    }

    /// Answer a read-only query against the state
    fn query(state: &Self::State, name: &str) -> Option<serde_json::Value> {
        let _ = (state, name);
        None
    }
}
