//! Activities: non-deterministic work dispatched from workflow steps

mod context;
mod definition;
mod registry;
mod runner;

pub use context::ActivityContext;
pub use definition::{Activity, ActivityError};
pub use registry::{ActivityHandler, ActivityRegistry};
pub(crate) use runner::ActivityRunner;
