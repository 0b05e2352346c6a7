//! Workflow executor: the execution driver
//!
//! The `WorkflowExecutor` is responsible for:
//! - Starting workflows and delivering signals
//! - Running one invocation per resume message, under the overlap lock
//! - Handing activity deliveries to the activity runner
//! - Propagating child outcomes to the parent's event log
//! - Answering queries

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::context::{child_kind, ContextSeed, Runtime};
use super::history::History;
use super::registry::{RegistryError, WorkflowRegistry};
use crate::activity::{Activity, ActivityRegistry, ActivityRunner};
use crate::clock::{until, Clock, SystemClock};
use crate::config::EngineConfig;
use crate::lock::{LockClass, LockError, LockStore, OverlapLock};
use crate::persistence::{
    ExceptionRecord, LogEntry, NewWorkflow, StepOutcome, StoreError, WorkflowInstance,
    WorkflowStore,
};
use crate::queue::{Delivery, EnqueueOptions, MessageQueue, QueueError, QueueMessage, Routing};
use crate::workflow::{Halt, Workflow, WorkflowError, WorkflowSignal, WorkflowStatus};

/// Errors from executor operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Options for starting a workflow
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Overrides the engine's default routing; inherited by activities and
    /// children
    pub routing: Routing,

    pub correlation_id: Option<Uuid>,

    pub tags: Vec<String>,
}

impl StartOptions {
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.routing.queue = Some(queue.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// What to do with a delivery after handling it
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Done; remove the message
    Ack,

    /// Deliver the same message again after a delay
    Release(Duration),

    /// Deliver a replacement payload after a delay, keeping the unique key
    Reschedule(QueueMessage, Duration),
}

impl Disposition {
    /// Settle a delivery on the transport
    pub async fn apply(
        self,
        queue: &dyn MessageQueue,
        delivery_id: Uuid,
    ) -> Result<(), QueueError> {
        match self {
            Self::Ack => queue.ack(delivery_id).await,
            Self::Release(delay) => queue.release(delivery_id, delay).await,
            Self::Reschedule(message, delay) => queue.reschedule(delivery_id, message, delay).await,
        }
    }
}

/// Workflow executor
///
/// Register workflow and activity types before sharing the executor between
/// workers; every delivery is then handled through [`handle`](Self::handle).
///
/// # Example
///
/// ```ignore
/// use replayflow_durable::prelude::*;
///
/// let mut executor = WorkflowExecutor::new(store, queue, locks);
/// executor.register::<OrderWorkflow>();
/// executor.register_activity(ChargeCard::new(gateway));
///
/// let workflow_id = executor
///     .start::<OrderWorkflow>(order_id, StartOptions::default())
///     .await?;
/// ```
pub struct WorkflowExecutor {
    runtime: Runtime,
    locks: Arc<dyn LockStore>,
    workflows: WorkflowRegistry,
    activities: ActivityRegistry,
}

impl WorkflowExecutor {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        queue: Arc<dyn MessageQueue>,
        locks: Arc<dyn LockStore>,
    ) -> Self {
        Self {
            runtime: Runtime {
                store,
                queue,
                clock: Arc::new(SystemClock),
                config: Arc::new(EngineConfig::default()),
            },
            locks,
            workflows: WorkflowRegistry::new(),
            activities: ActivityRegistry::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.runtime.config = Arc::new(config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.runtime.clock = clock;
        self
    }

    /// Register a workflow type
    pub fn register<W: Workflow>(&mut self) {
        self.workflows.register::<W>();
        info!(workflow_type = W::TYPE, "registered workflow type");
    }

    /// Register an activity implementation
    pub fn register_activity<A: Activity>(&mut self, activity: A) {
        self.activities.register(activity);
        info!(activity_type = A::TYPE, "registered activity type");
    }

    pub fn config(&self) -> &EngineConfig {
        &self.runtime.config
    }

    pub fn store(&self) -> &Arc<dyn WorkflowStore> {
        &self.runtime.store
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue> {
        &self.runtime.queue
    }

    fn overlap_lock(&self) -> OverlapLock {
        OverlapLock::new(
            self.locks.clone(),
            self.runtime.clock.clone(),
            self.runtime.config.lock_config(),
        )
    }

    // ============================================
    // Client operations
    // ============================================

    /// Start a new workflow
    #[instrument(skip(self, input, options), fields(workflow_type = W::TYPE))]
    pub async fn start<W: Workflow>(
        &self,
        input: W::Input,
        options: StartOptions,
    ) -> Result<Uuid, ExecutorError> {
        let input = serde_json::to_value(&input)?;
        self.start_by_type(W::TYPE, input, options).await
    }

    /// Start a workflow by its registered type name
    #[instrument(skip(self, input, options))]
    pub async fn start_by_type(
        &self,
        workflow_type: &str,
        input: Value,
        options: StartOptions,
    ) -> Result<Uuid, ExecutorError> {
        if !self.workflows.contains(workflow_type) {
            return Err(RegistryError::UnknownWorkflowType(workflow_type.to_string()).into());
        }

        let workflow_id = Uuid::now_v7();
        let routing = options.routing.or(&self.runtime.config.routing);

        self.runtime
            .store
            .create_workflow(NewWorkflow {
                id: workflow_id,
                workflow_type: workflow_type.to_string(),
                input,
                routing: routing.clone(),
                correlation_id: options.correlation_id,
                tags: options.tags,
            })
            .await?;
        self.runtime
            .store
            .transition_status(workflow_id, WorkflowStatus::Pending)
            .await?;
        self.enqueue_resume(workflow_id, routing).await?;

        info!(%workflow_id, "started workflow");
        Ok(workflow_id)
    }

    /// Deliver a signal to a workflow
    ///
    /// The store journals the signal under the next sequence and the
    /// workflow is resumed. Signals to a finished workflow are journaled but wake
    /// nothing.
    #[instrument(skip(self, signal), fields(signal = %signal.name))]
    pub async fn signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), ExecutorError> {
        let instance = self.instance(workflow_id).await?;

        self.runtime
            .store
            .append_signal(workflow_id, signal, None)
            .await?;

        if instance.status.is_terminal() {
            warn!(%workflow_id, status = %instance.status, "signal sent to finished workflow");
            return Ok(());
        }

        self.enqueue_resume(workflow_id, instance.routing).await?;
        debug!(%workflow_id, "signal sent");
        Ok(())
    }

    /// Answer a read-only query from the journaled signals
    ///
    /// Runs no activity and writes nothing.
    pub async fn query(
        &self,
        workflow_id: Uuid,
        name: &str,
    ) -> Result<Option<Value>, ExecutorError> {
        let instance = self.instance(workflow_id).await?;
        let entry = self.workflows.get(&instance.workflow_type)?;
        let signals = self.runtime.store.load_signals(workflow_id, None).await?;

        Ok((entry.query)(&signals, name))
    }

    /// Re-run a failed workflow from its event log
    #[instrument(skip(self))]
    pub async fn restart(&self, workflow_id: Uuid) -> Result<(), ExecutorError> {
        let instance = self.instance(workflow_id).await?;

        self.runtime
            .store
            .transition_status(workflow_id, WorkflowStatus::Pending)
            .await?;
        self.enqueue_resume(workflow_id, instance.routing).await?;

        info!(%workflow_id, "restarted workflow");
        Ok(())
    }

    pub async fn status(&self, workflow_id: Uuid) -> Result<WorkflowStatus, ExecutorError> {
        Ok(self.instance(workflow_id).await?.status)
    }

    /// Output of a completed workflow
    pub async fn output(&self, workflow_id: Uuid) -> Result<Option<Value>, ExecutorError> {
        Ok(self.instance(workflow_id).await?.output)
    }

    /// Exceptions recorded for a workflow, oldest first
    pub async fn exceptions(
        &self,
        workflow_id: Uuid,
    ) -> Result<Vec<ExceptionRecord>, ExecutorError> {
        Ok(self.runtime.store.list_exceptions(workflow_id).await?)
    }

    async fn instance(&self, workflow_id: Uuid) -> Result<WorkflowInstance, ExecutorError> {
        self.runtime
            .store
            .get_workflow(workflow_id)
            .await?
            .ok_or(ExecutorError::WorkflowNotFound(workflow_id))
    }

    async fn enqueue_resume(
        &self,
        workflow_id: Uuid,
        routing: Routing,
    ) -> Result<bool, QueueError> {
        self.runtime
            .queue
            .enqueue(
                QueueMessage::ResumeWorkflow { workflow_id },
                EnqueueOptions::routed(routing),
            )
            .await
    }

    // ============================================
    // Delivery handling
    // ============================================

    /// Handle one delivery and decide what happens to it
    ///
    /// Never fails: store and transport errors turn into a delayed release
    /// so the message is retried.
    #[instrument(
        skip(self, delivery),
        fields(delivery_id = %delivery.id, kind = delivery.message.kind())
    )]
    pub async fn handle(&self, delivery: &Delivery) -> Disposition {
        let result = match &delivery.message {
            QueueMessage::ResumeWorkflow { workflow_id } => self.run_workflow(*workflow_id).await,
            QueueMessage::TimerFired {
                workflow_id,
                fire_at,
                ..
            } => {
                let now = self.runtime.clock.now();
                if *fire_at > now {
                    let delay = until(now, *fire_at).min(self.runtime.max_delay());
                    debug!(%workflow_id, %fire_at, ?delay, "timer not due yet");
                    return Disposition::Release(delay);
                }
                self.run_workflow(*workflow_id).await
            }
            QueueMessage::ExecuteActivity(task) => {
                ActivityRunner::new(&self.runtime, self.overlap_lock(), &self.activities)
                    .run(task)
                    .await
            }
        };

        match result {
            Ok(disposition) => disposition,
            Err(ExecutorError::WorkflowNotFound(workflow_id)) => {
                error!(%workflow_id, "dropping message for unknown workflow");
                Disposition::Ack
            }
            Err(ExecutorError::Store(StoreError::Transition(err))) => {
                debug!(error = %err, "status changed concurrently, retrying later");
                Disposition::Release(self.runtime.config.lock_retry_delay)
            }
            Err(err) => {
                warn!(error = %err, attempt = delivery.attempt, "delivery failed, retrying later");
                Disposition::Release(self.runtime.config.error_retry_delay)
            }
        }
    }

    /// Run one invocation of a workflow under the overlap lock
    #[instrument(skip(self))]
    async fn run_workflow(&self, workflow_id: Uuid) -> Result<Disposition, ExecutorError> {
        let lock = self.overlap_lock();
        let Some(guard) = lock
            .acquire(workflow_id, LockClass::Workflow, Uuid::now_v7().to_string())
            .await?
        else {
            return Ok(Disposition::Release(self.runtime.config.lock_retry_delay));
        };

        let result = self.invoke(workflow_id).await;

        if let Err(err) = lock.release(guard).await {
            warn!(%workflow_id, error = %err, "failed to release overlap lock");
        }
        result
    }

    async fn invoke(&self, workflow_id: Uuid) -> Result<Disposition, ExecutorError> {
        let store = &self.runtime.store;
        let instance = self.instance(workflow_id).await?;

        match instance.status {
            WorkflowStatus::Completed | WorkflowStatus::Failed => {
                debug!(
                    %workflow_id,
                    status = %instance.status,
                    "workflow already in terminal state"
                );
                return Ok(Disposition::Ack);
            }
            WorkflowStatus::Created => {
                warn!(%workflow_id, "workflow was never dispatched, ignoring resume");
                return Ok(Disposition::Ack);
            }
            WorkflowStatus::Running => {
                warn!(%workflow_id, "previous invocation did not finish, resuming");
            }
            WorkflowStatus::Pending | WorkflowStatus::Waiting => {
                store
                    .transition_status(workflow_id, WorkflowStatus::Running)
                    .await?;
            }
        }

        let workflow = self.workflows.get(&instance.workflow_type)?;
        let invocation_now = self.runtime.clock.now();
        let logs = store.load_logs(workflow_id).await?;
        let signals = store.load_signals(workflow_id, None).await?;
        let history = History::new(logs, signals);
        debug!(%workflow_id, logged_steps = history.len(), "replaying workflow");

        let seed = ContextSeed {
            instance: instance.clone(),
            history,
            invocation_now,
            runtime: self.runtime.clone(),
        };

        match (workflow.execute)(seed, instance.input.clone()).await {
            Ok(output) => {
                store.set_output(workflow_id, output.clone()).await?;
                store
                    .transition_status(workflow_id, WorkflowStatus::Completed)
                    .await?;
                info!(%workflow_id, "workflow completed");
                self.notify_parent(&instance, StepOutcome::Completed(output))
                    .await?;
            }
            Err(Halt::Suspended) => {
                store
                    .transition_status(workflow_id, WorkflowStatus::Waiting)
                    .await?;
                debug!(%workflow_id, "workflow suspended");
            }
            Err(Halt::Failed(err)) => self.fail_workflow(&instance, err).await?,
            Err(Halt::Store(err)) => return Err(err.into()),
            Err(Halt::Queue(err)) => return Err(err.into()),
        }

        Ok(Disposition::Ack)
    }

    async fn fail_workflow(
        &self,
        instance: &WorkflowInstance,
        err: WorkflowError,
    ) -> Result<(), ExecutorError> {
        let store = &self.runtime.store;

        store
            .record_exception(ExceptionRecord {
                workflow_id: instance.id,
                workflow_type: instance.workflow_type.clone(),
                error: err.clone(),
                recorded_at: self.runtime.clock.now(),
            })
            .await?;
        store
            .transition_status(instance.id, WorkflowStatus::Failed)
            .await?;

        error!(workflow_id = %instance.id, error = %err, "workflow failed");
        self.notify_parent(instance, StepOutcome::Failed(err.into()))
            .await
    }

    /// Log a finished child's outcome on its parent's step and wake the
    /// parent
    async fn notify_parent(
        &self,
        child: &WorkflowInstance,
        outcome: StepOutcome,
    ) -> Result<(), ExecutorError> {
        let store = &self.runtime.store;
        let Some(relationship) = store.find_parent(child.id).await? else {
            return Ok(());
        };
        let parent_id = relationship.parent_workflow_id;
        let signal_mark = store.next_signal_sequence(parent_id).await?;

        let inserted = store
            .insert_log(LogEntry {
                workflow_id: parent_id,
                index: relationship.parent_index,
                kind: child_kind(&child.workflow_type),
                outcome,
                recorded_at: self.runtime.clock.now(),
                signal_mark,
            })
            .await?;

        debug!(
            %parent_id,
            child_id = %child.id,
            parent_index = relationship.parent_index,
            logged = inserted.was_inserted(),
            "child outcome delivered to parent"
        );

        let parent = self.instance(parent_id).await?;
        self.enqueue_resume(parent_id, parent.routing).await?;
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowExecutor")
            .field("workflows", &self.workflows)
            .field("activities", &self.activities)
            .field("config", &self.runtime.config)
            .finish()
    }
}
