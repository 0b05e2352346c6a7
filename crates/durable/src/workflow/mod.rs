//! Workflow definitions, signals and lifecycle status

mod call;
mod definition;
mod signal;
mod status;

pub use call::{ActivityCall, ActivityOptions};
pub use definition::{error_codes, Halt, Workflow, WorkflowError};
pub use signal::{signal_names, WorkflowSignal};
pub use status::WorkflowStatus;
