//! # Durable Workflow Engine
//!
//! A replay-based engine for long-running, fault-tolerant workflows.
//!
//! ## Features
//!
//! - **Replay execution**: workflow procedures are re-run from the start on
//!   every invocation; recorded outcomes are fed back from the event log
//! - **Determinism primitives**: conditions, durable timers, side effects
//!   and versioned branches, all logged once per step
//! - **Activities and child workflows**: dispatched as queue messages and
//!   folded back in as logged steps
//! - **Signals and queries**: journaled external input, applied in receipt
//!   order during replay
//! - **Overlap lock**: at most one invocation per workflow at a time
//! - **Saga compensation**: sequential or parallel undo lists
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        WorkerPool                            │
//! │          (receives deliveries, settles dispositions)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     WorkflowExecutor                         │
//! │   (overlap lock, replay invocation, activity attempts)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │      WorkflowStore  ·  MessageQueue  ·  LockStore            │
//! │   (event log, journals, relationships · transport · mutex)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use replayflow_durable::prelude::*;
//!
//! #[derive(Default)]
//! struct ApprovalState {
//!     approved: bool,
//! }
//!
//! struct ApprovalWorkflow;
//!
//! #[async_trait]
//! impl Workflow for ApprovalWorkflow {
//!     const TYPE: &'static str = "approval_workflow";
//!     type Input = String;
//!     type Output = String;
//!     type State = ApprovalState;
//!
//!     async fn execute(
//!         ctx: &mut WorkflowContext<ApprovalState>,
//!         request: String,
//!     ) -> Result<String, Halt> {
//!         let ticket = ctx.activity::<OpenTicket>(request).await??;
//!         if !ctx
//!             .await_with_timeout(Duration::from_secs(86_400), |s| s.approved)
//!             .await?
//!         {
//!             return Err(Halt::fail("approval timed out"));
//!         }
//!         Ok(ticket)
//!     }
//!
//!     fn on_signal(state: &mut ApprovalState, signal: &WorkflowSignal) {
//!         if signal.name == "approve" {
//!             state.approved = true;
//!         }
//!     }
//! }
//! ```

pub mod activity;
pub mod clock;
pub mod config;
pub mod engine;
pub mod lock;
pub mod persistence;
pub mod queue;
pub mod reliability;
pub mod saga;
pub mod state_machine;
pub mod worker;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use async_trait::async_trait;

    pub use crate::activity::{Activity, ActivityContext, ActivityError};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::{EngineConfig, WorkerPoolConfig};
    pub use crate::engine::{
        ChildWorkflowHandle, Disposition, ExecutorError, StartOptions, WorkflowContext,
        WorkflowExecutor,
    };
    pub use crate::lock::{InMemoryLockStore, LockStore};
    pub use crate::persistence::{InMemoryWorkflowStore, StoreError, WorkflowStore};
    pub use crate::queue::{InMemoryMessageQueue, MessageQueue, Routing};
    pub use crate::reliability::RetryPolicy;
    pub use crate::saga::Saga;
    pub use crate::worker::{WorkerPool, WorkerPoolError};
    pub use crate::workflow::{
        ActivityCall, ActivityOptions, Halt, Workflow, WorkflowError, WorkflowSignal,
        WorkflowStatus,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, WorkerPoolConfig};
pub use engine::{
    ChildWorkflowHandle, Disposition, ExecutorError, StartOptions, WorkflowContext,
    WorkflowExecutor,
};
pub use lock::{InMemoryLockStore, LockStore, OverlapLock};
pub use persistence::{InMemoryWorkflowStore, StoreError, WorkflowStore};
pub use queue::{InMemoryMessageQueue, MessageQueue, QueueMessage, Routing};
pub use reliability::RetryPolicy;
pub use saga::Saga;
pub use state_machine::{StateField, StateMachine, TransitionError};
pub use worker::{WorkerPool, WorkerPoolError};
pub use workflow::{
    ActivityCall, ActivityOptions, Halt, Workflow, WorkflowError, WorkflowSignal, WorkflowStatus,
};
