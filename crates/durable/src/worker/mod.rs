//! Worker pool consuming deliveries
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     WorkerPool                        │
//! │  ┌───────────┐     ┌──────────────────────────────┐   │
//! │  │ poll loop │ ──▶ │ WorkflowExecutor::handle     │   │
//! │  │ (receive) │     │ [d1] [d2] ... (semaphore)    │   │
//! │  └───────────┘     └──────────────┬───────────────┘   │
//! │                                   ▼                   │
//! │                 ack / release / reschedule            │
//! └──────────────────────────────────────────────────────┘
//! ```

mod pool;

pub use crate::config::WorkerPoolConfig;
pub use pool::{WorkerPool, WorkerPoolError, WorkerPoolStatus};
