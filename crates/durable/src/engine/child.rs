//! Handle to a spawned child workflow

use std::fmt;
use std::marker::PhantomData;

use uuid::Uuid;

use super::context::WorkflowContext;
use crate::workflow::{Halt, Workflow, WorkflowError, WorkflowSignal};

/// Proxy to a child started with [`WorkflowContext::spawn_child`]
///
/// Signals sent through the handle go to the child's journal only; the
/// parent's step index, clock and identity are left untouched.
pub struct ChildWorkflowHandle<W> {
    workflow_id: Uuid,
    parent_index: u64,
    _workflow: PhantomData<fn() -> W>,
}

impl<W: Workflow> ChildWorkflowHandle<W> {
    pub(crate) fn new(workflow_id: Uuid, parent_index: u64) -> Self {
        Self {
            workflow_id,
            parent_index,
            _workflow: PhantomData,
        }
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    /// Parent step that spawned the child
    pub fn parent_index(&self) -> u64 {
        self.parent_index
    }

    /// Deliver a signal to the child
    pub async fn signal<S: Send + Sync + 'static>(
        &self,
        ctx: &mut WorkflowContext<S>,
        signal: WorkflowSignal,
    ) -> Result<(), Halt> {
        ctx.signal_child(self.workflow_id, signal).await
    }

    /// Wait for the child to finish; consumes one parent step
    pub async fn join<S: Send + Sync + 'static>(
        &self,
        ctx: &mut WorkflowContext<S>,
    ) -> Result<Result<W::Output, WorkflowError>, Halt> {
        ctx.join_child::<W>(self.workflow_id).await
    }
}

impl<W> Clone for ChildWorkflowHandle<W> {
    fn clone(&self) -> Self {
        Self {
            workflow_id: self.workflow_id,
            parent_index: self.parent_index,
            _workflow: PhantomData,
        }
    }
}

impl<W> fmt::Debug for ChildWorkflowHandle<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildWorkflowHandle")
            .field("workflow_id", &self.workflow_id)
            .field("parent_index", &self.parent_index)
            .finish()
    }
}
