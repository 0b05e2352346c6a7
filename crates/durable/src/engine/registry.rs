//! Workflow registry for type-erased workflow execution
//!
//! Workflows are registered under their stable [`Workflow::TYPE`] key. The
//! registry stores closures that run the procedure from JSON input and
//! rebuild state for queries, so the executor never needs concrete types.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::context::{ContextSeed, WorkflowContext};
use crate::persistence::SignalEntry;
use crate::workflow::{Halt, Workflow};

/// Runs one invocation of a workflow procedure
pub(crate) type ExecuteFn =
    Arc<dyn Fn(ContextSeed, Value) -> BoxFuture<'static, Result<Value, Halt>> + Send + Sync>;

/// Folds the signal journal into fresh state and answers a named query
pub(crate) type QueryFn = Arc<dyn Fn(&[SignalEntry], &str) -> Option<Value> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct RegisteredWorkflow {
    pub execute: ExecuteFn,
    pub query: QueryFn,
}

/// Registry of workflow types
#[derive(Default)]
pub struct WorkflowRegistry {
    workflows: HashMap<String, RegisteredWorkflow>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow type
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut registry = WorkflowRegistry::new();
    /// registry.register::<OrderWorkflow>();
    /// ```
    pub fn register<W: Workflow>(&mut self) {
        let execute: ExecuteFn = Arc::new(|seed: ContextSeed, input: Value| {
            async move {
                let input: W::Input = serde_json::from_value(input)?;
                let mut ctx = WorkflowContext::new(seed, W::State::default(), W::on_signal);
                let output = W::execute(&mut ctx, input).await?;
                Ok::<Value, Halt>(serde_json::to_value(output)?)
            }
            .boxed()
        });

        let query: QueryFn = Arc::new(|signals: &[SignalEntry], name: &str| {
            let mut state = W::State::default();
            for entry in signals {
                W::on_signal(&mut state, &entry.signal);
            }
            W::query(&state, name)
        });

        self.workflows
            .insert(W::TYPE.to_string(), RegisteredWorkflow { execute, query });
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.workflows.contains_key(workflow_type)
    }

    pub(crate) fn get(&self, workflow_type: &str) -> Result<RegisteredWorkflow, RegistryError> {
        self.workflows
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownWorkflowType(workflow_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn workflow_types(&self) -> impl Iterator<Item = &str> {
        self.workflows.keys().map(|s| s.as_str())
    }
}

impl fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflow_types", &self.workflows.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Errors from registry lookups
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    #[error("unknown activity type: {0}")]
    UnknownActivityType(String),
}
