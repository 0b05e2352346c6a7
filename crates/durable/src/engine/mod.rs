//! Workflow execution engine
//!
//! The engine replays workflow procedures against their event log. The
//! [`WorkflowExecutor`] drives one invocation per queue delivery; the
//! [`WorkflowContext`] threaded through each invocation provides the
//! determinism primitives.

mod child;
mod context;
mod executor;
mod history;
mod registry;

pub use child::ChildWorkflowHandle;
pub use context::{step_kinds, WorkflowContext};
pub(crate) use context::Runtime;
pub use executor::{Disposition, ExecutorError, StartOptions, WorkflowExecutor};
pub use history::History;
pub use registry::{RegistryError, WorkflowRegistry};
