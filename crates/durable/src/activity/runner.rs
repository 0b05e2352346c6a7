//! Activity attempts
//!
//! Runs one delivery of an `ExecuteActivity` message: takes the activity
//! slot of the overlap lock, runs the handler unless the step already has an
//! outcome, logs the final outcome and wakes the owning workflow. Retries are
//! handed back as a rescheduled message carrying the next attempt number.

use std::time::Duration;

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::{ActivityContext, ActivityRegistry};
use crate::engine::{Disposition, ExecutorError, RegistryError, Runtime};
use crate::lock::{LockClass, OverlapLock};
use crate::persistence::{LogEntry, StepOutcome};
use crate::queue::{ActivityTask, EnqueueOptions, QueueMessage};

enum Attempt {
    /// Another delivery of this step already logged an outcome
    AlreadyLogged,
    Retry(Duration),
    Logged,
}

pub(crate) struct ActivityRunner<'a> {
    runtime: &'a Runtime,
    lock: OverlapLock,
    registry: &'a ActivityRegistry,
}

impl<'a> ActivityRunner<'a> {
    pub(crate) fn new(
        runtime: &'a Runtime,
        lock: OverlapLock,
        registry: &'a ActivityRegistry,
    ) -> Self {
        Self {
            runtime,
            lock,
            registry,
        }
    }

    #[instrument(
        skip(self, task),
        fields(
            workflow_id = %task.workflow_id,
            index = task.index,
            activity_type = %task.activity_type,
            attempt = task.attempt
        )
    )]
    pub(crate) async fn run(&self, task: &ActivityTask) -> Result<Disposition, ExecutorError> {
        let Some(guard) = self
            .lock
            .acquire(task.workflow_id, LockClass::Activity, Uuid::now_v7().to_string())
            .await?
        else {
            return Ok(Disposition::Release(self.runtime.config.lock_retry_delay));
        };

        let result = self.attempt(task).await;

        if let Err(err) = self.lock.release(guard).await {
            warn!(error = %err, "failed to release overlap lock");
        }

        match result? {
            Attempt::Retry(delay) => {
                let next = ActivityTask {
                    attempt: task.attempt + 1,
                    ..task.clone()
                };
                Ok(Disposition::Reschedule(QueueMessage::ExecuteActivity(next), delay))
            }
            Attempt::AlreadyLogged | Attempt::Logged => {
                self.wake(task.workflow_id).await?;
                Ok(Disposition::Ack)
            }
        }
    }

    async fn attempt(&self, task: &ActivityTask) -> Result<Attempt, ExecutorError> {
        let store = &self.runtime.store;

        if store.get_log(task.workflow_id, task.index).await?.is_some() {
            debug!("activity step already logged");
            return Ok(Attempt::AlreadyLogged);
        }

        let handler = self
            .registry
            .get(&task.activity_type)
            .ok_or_else(|| RegistryError::UnknownActivityType(task.activity_type.clone()))?;

        let policy = &task.options.retry_policy;
        let ctx = ActivityContext::new(
            task.workflow_id,
            task.index,
            task.activity_type.clone(),
            task.attempt,
            policy.max_attempts,
        );

        let outcome = match handler(ctx, task.input.clone()).await {
            Ok(value) => StepOutcome::Completed(value),
            Err(err) => match policy.next_retry(task.attempt, &err) {
                Some(delay) => {
                    warn!(error = %err, ?delay, "activity attempt failed, retrying");
                    return Ok(Attempt::Retry(delay));
                }
                None => {
                    warn!(error = %err, "activity failed permanently");
                    StepOutcome::Failed(err)
                }
            },
        };

        let signal_mark = store.next_signal_sequence(task.workflow_id).await?;
        let inserted = store
            .insert_log(LogEntry {
                workflow_id: task.workflow_id,
                index: task.index,
                kind: format!("activity:{}", task.activity_type),
                outcome,
                recorded_at: self.runtime.clock.now(),
                signal_mark,
            })
            .await?;

        debug!(logged = inserted.was_inserted(), "activity outcome logged");
        Ok(Attempt::Logged)
    }

    /// Enqueue a resume for the workflow that owns the step
    async fn wake(&self, workflow_id: Uuid) -> Result<(), ExecutorError> {
        let instance = self
            .runtime
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(workflow_id))?;

        self.runtime
            .queue
            .enqueue(
                QueueMessage::ResumeWorkflow { workflow_id },
                EnqueueOptions::routed(instance.routing),
            )
            .await?;
        Ok(())
    }
}
