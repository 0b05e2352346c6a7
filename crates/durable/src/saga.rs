//! Saga compensation
//!
//! A [`Saga`] collects undo activities while a workflow makes progress and
//! runs them when it has to back out. Compensations are ordinary activity
//! calls, so every one of them is a logged step and replays like any other.

use crate::activity::{Activity, ActivityError};
use crate::engine::WorkflowContext;
use crate::workflow::{ActivityCall, Halt};

/// Ordered list of compensating activities
#[derive(Debug, Clone, Default)]
pub struct Saga {
    compensations: Vec<ActivityCall>,
    parallel: bool,
    continue_with_error: bool,
}

impl Saga {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run compensations concurrently instead of in reverse order
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Keep compensating after a failed compensation
    pub fn continue_with_error(mut self) -> Self {
        self.continue_with_error = true;
        self
    }

    /// Register a compensation
    pub fn add(&mut self, call: ActivityCall) {
        self.compensations.push(call);
    }

    /// Register a typed compensation activity
    pub fn add_activity<A: Activity>(&mut self, input: &A::Input) -> Result<(), Halt> {
        self.add(ActivityCall::of::<A>(input)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.compensations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compensations.is_empty()
    }

    /// Run the registered compensations
    ///
    /// Sequential mode walks the list newest first and fails the workflow on
    /// the first compensation failure, unless `continue_with_error` is set.
    /// Parallel mode dispatches everything at once. Either way the
    /// failures that did not halt are returned.
    pub async fn compensate<S: Send + Sync + 'static>(
        &self,
        ctx: &mut WorkflowContext<S>,
    ) -> Result<Vec<ActivityError>, Halt> {
        if self.parallel {
            let outcomes = ctx.all(self.compensations.clone()).await?;
            return Ok(outcomes.into_iter().filter_map(Result::err).collect());
        }

        let mut failures = Vec::new();
        for call in self.compensations.iter().rev() {
            if let Err(err) = ctx.call(call.clone()).await? {
                if !self.continue_with_error {
                    return Err(err.into());
                }
                failures.push(err);
            }
        }
        Ok(failures)
    }
}
