//! Persistence layer for workflow instances and their journals
//!
//! [`WorkflowStore`] is the narrow storage contract the engine depends on;
//! [`InMemoryWorkflowStore`] implements it for tests and single-process use.

mod memory;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use store::{
    ExceptionRecord, InsertOutcome, LogEntry, NewWorkflow, Relationship, SignalEntry, StepOutcome,
    StoreError, TimerEntry, WorkflowInstance, WorkflowStore,
};
