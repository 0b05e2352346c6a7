//! WorkflowStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::queue::Routing;
use crate::state_machine::TransitionError;
use crate::workflow::{WorkflowError, WorkflowSignal, WorkflowStatus};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    /// Illegal status change
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// Backend failure (connection, constraint other than uniqueness, ...)
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result of an insert-if-absent write
///
/// A uniqueness collision is not an error: the row that already occupies the
/// key is returned and the caller proceeds with it as if it had been read in
/// the first place.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome<T> {
    /// The row was written by this call
    Inserted(T),

    /// Another writer got there first; this is the row that landed
    AlreadyPresent(T),
}

impl<T> InsertOutcome<T> {
    /// The row stored under the key, whoever wrote it
    pub fn into_inner(self) -> T {
        match self {
            Self::Inserted(row) | Self::AlreadyPresent(row) => row,
        }
    }

    /// Borrow the stored row
    pub fn row(&self) -> &T {
        match self {
            Self::Inserted(row) | Self::AlreadyPresent(row) => row,
        }
    }

    /// Check whether this call wrote the row
    pub fn was_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Parameters for creating a workflow instance
#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub id: Uuid,
    pub workflow_type: String,
    pub input: Value,
    pub routing: Routing,
    pub correlation_id: Option<Uuid>,
    pub tags: Vec<String>,
}

/// A persisted workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,

    /// Registry key of the procedure
    pub workflow_type: String,

    /// Serialized start arguments
    pub input: Value,

    /// Serialized return value, set on completion
    pub output: Option<Value>,

    pub status: WorkflowStatus,

    /// Queue routing used for every message addressed to this workflow
    pub routing: Routing,

    pub correlation_id: Option<Uuid>,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Recorded result of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum StepOutcome {
    /// Resolved value
    Completed(Value),

    /// Final failure (activity out of retries, failed child)
    Failed(ActivityError),
}

impl StepOutcome {
    /// Convert to a plain result
    pub fn into_result(self) -> Result<Value, ActivityError> {
        match self {
            Self::Completed(value) => Ok(value),
            Self::Failed(err) => Err(err),
        }
    }
}

/// One event log row, unique on `(workflow_id, index)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub workflow_id: Uuid,

    /// Zero-based step index
    pub index: u64,

    /// Which primitive or activity produced the row
    pub kind: String,

    pub outcome: StepOutcome,

    /// Logical time the step resolved at
    pub recorded_at: DateTime<Utc>,

    /// Signals with a lower journal sequence are applied before the step
    /// resolves, on the live run and on every replay
    #[serde(default)]
    pub signal_mark: u64,
}

impl LogEntry {
    /// Build a resolved row
    pub fn completed(
        workflow_id: Uuid,
        index: u64,
        kind: impl Into<String>,
        value: Value,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_id,
            index,
            kind: kind.into(),
            outcome: StepOutcome::Completed(value),
            recorded_at,
            signal_mark: 0,
        }
    }

    pub fn with_signal_mark(mut self, signal_mark: u64) -> Self {
        self.signal_mark = signal_mark;
        self
    }

    /// The resolved value, if the step succeeded
    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            StepOutcome::Completed(value) => Some(value),
            StepOutcome::Failed(_) => None,
        }
    }
}

/// One signal journal row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEntry {
    pub workflow_id: Uuid,

    /// Per-workflow append order, gapless from zero; assigned by the store
    pub sequence: u64,

    pub signal: WorkflowSignal,

    /// Stamped by the store on append; informational only
    pub received_at: DateTime<Utc>,

    /// Makes re-sent signals idempotent (used by parent-to-child signals)
    pub dedupe_key: Option<String>,
}

/// One durable delay, unique on `(workflow_id, index)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerEntry {
    pub workflow_id: Uuid,
    pub index: u64,
    pub fire_at: DateTime<Utc>,
}

/// Parent-child edge with the parent's pivot data, unique on
/// `(parent_workflow_id, parent_index)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub parent_workflow_id: Uuid,
    pub parent_index: u64,
    pub parent_now: DateTime<Utc>,
    pub child_workflow_id: Uuid,
}

/// Diagnostic record written when a workflow fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    pub workflow_id: Uuid,
    pub workflow_type: String,
    pub error: WorkflowError,
    pub recorded_at: DateTime<Utc>,
}

/// Persistence contract of the engine
///
/// Implementations must enforce the uniqueness constraints at the storage
/// layer and report collisions through [`InsertOutcome`].
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // ============================================
    // Workflow instances
    // ============================================

    /// Create an instance in `created` status
    async fn create_workflow(
        &self,
        workflow: NewWorkflow,
    ) -> Result<InsertOutcome<WorkflowInstance>, StoreError>;

    async fn get_workflow(&self, workflow_id: Uuid) -> Result<Option<WorkflowInstance>, StoreError>;

    /// Atomically check and apply a status transition, returning the
    /// previous status
    async fn transition_status(
        &self,
        workflow_id: Uuid,
        to: WorkflowStatus,
    ) -> Result<WorkflowStatus, StoreError>;

    async fn set_output(&self, workflow_id: Uuid, output: Value) -> Result<(), StoreError>;

    // ============================================
    // Event log
    // ============================================

    async fn insert_log(&self, entry: LogEntry) -> Result<InsertOutcome<LogEntry>, StoreError>;

    async fn get_log(&self, workflow_id: Uuid, index: u64) -> Result<Option<LogEntry>, StoreError>;

    /// All rows ordered by index
    async fn load_logs(&self, workflow_id: Uuid) -> Result<Vec<LogEntry>, StoreError>;

    // ============================================
    // Signal journal
    // ============================================

    /// Append a signal, assigning the next sequence and the receipt time
    /// atomically; with a dedupe key, an existing row with the same key is
    /// returned instead
    async fn append_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
        dedupe_key: Option<String>,
    ) -> Result<InsertOutcome<SignalEntry>, StoreError>;

    /// Signals in sequence order, optionally only those below `before`
    async fn load_signals(
        &self,
        workflow_id: Uuid,
        before: Option<u64>,
    ) -> Result<Vec<SignalEntry>, StoreError>;

    /// Sequence the next appended signal will get
    ///
    /// Every signal below it is committed, so a log row carrying this value
    /// as its `signal_mark` only refers to signals any later reader loads.
    async fn next_signal_sequence(&self, workflow_id: Uuid) -> Result<u64, StoreError>;

    // ============================================
    // Timers
    // ============================================

    async fn insert_timer(
        &self,
        timer: TimerEntry,
    ) -> Result<InsertOutcome<TimerEntry>, StoreError>;

    async fn get_timer(
        &self,
        workflow_id: Uuid,
        index: u64,
    ) -> Result<Option<TimerEntry>, StoreError>;

    // ============================================
    // Relationships
    // ============================================

    async fn link_child(
        &self,
        relationship: Relationship,
    ) -> Result<InsertOutcome<Relationship>, StoreError>;

    async fn find_child(
        &self,
        parent_workflow_id: Uuid,
        parent_index: u64,
    ) -> Result<Option<Relationship>, StoreError>;

    async fn find_parent(&self, child_workflow_id: Uuid)
        -> Result<Option<Relationship>, StoreError>;

    /// Children ordered by the parent's step index
    async fn list_children(&self, parent_workflow_id: Uuid)
        -> Result<Vec<Relationship>, StoreError>;

    // ============================================
    // Exceptions
    // ============================================

    async fn record_exception(&self, record: ExceptionRecord) -> Result<(), StoreError>;

    /// Records in write order
    async fn list_exceptions(&self, workflow_id: Uuid) -> Result<Vec<ExceptionRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_outcome() {
        let inserted = InsertOutcome::Inserted(1);
        let present = InsertOutcome::AlreadyPresent(2);

        assert!(inserted.was_inserted());
        assert!(!present.was_inserted());
        assert_eq!(*present.row(), 2);
        assert_eq!(inserted.into_inner(), 1);
    }

    #[test]
    fn test_step_outcome_shape() {
        let ok = serde_json::to_value(StepOutcome::Completed(Value::from("activity"))).unwrap();
        assert_eq!(ok, serde_json::json!({ "status": "completed", "value": "activity" }));

        let failed = StepOutcome::Failed(ActivityError::non_retryable("declined"));
        assert_eq!(
            failed.into_result().unwrap_err().message,
            "declined"
        );
    }

    #[test]
    fn test_log_entry_value() {
        let entry = LogEntry::completed(Uuid::now_v7(), 0, "await", Value::Bool(true), Utc::now());

        assert_eq!(entry.value(), Some(&Value::Bool(true)));
    }
}
