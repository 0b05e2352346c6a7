//! Replay context and determinism primitives
//!
//! A [`WorkflowContext`] is created fresh for every invocation and threaded
//! explicitly through the workflow procedure. Each primitive call consumes
//! one step index, in program order:
//!
//! 1. signals due before the step are applied to the state,
//! 2. a logged outcome for the index is returned as-is (replay),
//! 3. otherwise the real effect is performed: a value is computed and
//!    logged, a timer row is written, or work is dispatched and the
//!    procedure halts with [`Halt::Suspended`].
//!
//! Every write is insert-if-absent; when another invocation got there
//! first, the row that landed is used instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use super::child::ChildWorkflowHandle;
use super::history::History;
use crate::activity::{Activity, ActivityError};
use crate::clock::{after, until, Clock};
use crate::config::EngineConfig;
use crate::persistence::{
    LogEntry, NewWorkflow, Relationship, StepOutcome, StoreError, TimerEntry, WorkflowInstance,
    WorkflowStore,
};
use crate::queue::{ActivityTask, EnqueueOptions, MessageQueue, QueueMessage, Routing};
use crate::workflow::{
    error_codes, ActivityCall, ActivityOptions, Halt, Workflow, WorkflowError, WorkflowSignal,
    WorkflowStatus,
};

/// Log discriminators of the built-in primitives
pub mod step_kinds {
    pub const AWAIT: &str = "await";
    pub const AWAIT_WITH_TIMEOUT: &str = "await_with_timeout";
    pub const TIMER: &str = "timer";
    pub const SIDE_EFFECT: &str = "side_effect";
}

/// Services shared by every invocation
#[derive(Clone)]
pub(crate) struct Runtime {
    pub store: Arc<dyn WorkflowStore>,
    pub queue: Arc<dyn MessageQueue>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<EngineConfig>,
}

impl Runtime {
    /// Longest delay to request from the transport
    pub fn max_delay(&self) -> Duration {
        self.config.max_delay.min(self.queue.max_delay())
    }
}

/// Everything a context is built from, independent of the state type
pub(crate) struct ContextSeed {
    pub instance: WorkflowInstance,
    pub history: History,
    pub invocation_now: DateTime<Utc>,
    pub runtime: Runtime,
}

/// Unique key of the queue message running the activity of a step
pub(crate) fn activity_key(workflow_id: Uuid, index: u64) -> String {
    format!("activity:{workflow_id}:{index}")
}

/// Unique key of the queue message firing the timer of a step
pub(crate) fn timer_key(workflow_id: Uuid, index: u64) -> String {
    format!("timer:{workflow_id}:{index}")
}

/// Children get ids derived from the parent step, so a re-run of the
/// spawning step finds the same child
pub(crate) fn child_workflow_id(parent_workflow_id: Uuid, parent_index: u64) -> Uuid {
    Uuid::new_v5(&parent_workflow_id, &parent_index.to_be_bytes())
}

/// Kind logged for the outcome of a child workflow
pub(crate) fn child_kind(workflow_type: &str) -> String {
    format!("child:{workflow_type}")
}

/// Replay context of one invocation
///
/// `S` is the workflow's signal-mutable state. Signals are applied to it as
/// the procedure passes the steps they were received before.
pub struct WorkflowContext<S> {
    workflow_id: Uuid,
    workflow_type: String,
    routing: Routing,
    correlation_id: Option<Uuid>,
    index: u64,
    now: DateTime<Utc>,
    invocation_now: DateTime<Utc>,
    replaying: bool,
    steps: u64,
    child_signal_seq: u32,
    history: History,
    state: S,
    apply_signal: fn(&mut S, &WorkflowSignal),
    runtime: Runtime,
}

impl<S: Send + Sync + 'static> WorkflowContext<S> {
    pub(crate) fn new(
        seed: ContextSeed,
        state: S,
        apply_signal: fn(&mut S, &WorkflowSignal),
    ) -> Self {
        let ContextSeed {
            instance,
            history,
            invocation_now,
            runtime,
        } = seed;

        Self {
            workflow_id: instance.id,
            workflow_type: instance.workflow_type,
            routing: instance.routing,
            correlation_id: instance.correlation_id,
            index: 0,
            now: invocation_now,
            invocation_now,
            replaying: !history.is_empty(),
            steps: 0,
            child_signal_seq: 0,
            history,
            state,
            apply_signal,
            runtime,
        }
    }

    // ============================================
    // Accessors
    // ============================================

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    /// Index of the next step
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Logical now: the resolution time of the last step entered, or the
    /// invocation snapshot for a step being executed live
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Check whether recorded steps lie ahead of the current index
    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Mutable state; changes must be deterministic
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    // ============================================
    // Conditions and time
    // ============================================

    /// Wait until `condition` holds on the state
    ///
    /// While false, the invocation suspends without writing anything; a
    /// signal delivery re-invokes the workflow later.
    pub async fn await_condition<F>(&mut self, condition: F) -> Result<(), Halt>
    where
        F: Fn(&S) -> bool + Send,
    {
        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, step_kinds::AWAIT);
            self.advance();
            return Ok(());
        }

        if !condition(&self.state) {
            debug!(workflow_id = %self.workflow_id, index = self.index, "condition not met");
            return Err(Halt::Suspended);
        }

        if !self.replaying {
            self.record(step_kinds::AWAIT, Value::Bool(true)).await?;
        }
        self.advance();
        Ok(())
    }

    /// Like [`await_condition`](Self::await_condition), raced against a
    /// timer; resolves to `false` when the timer wins
    pub async fn await_with_timeout<F>(
        &mut self,
        timeout: Duration,
        condition: F,
    ) -> Result<bool, Halt>
    where
        F: Fn(&S) -> bool + Send,
    {
        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, step_kinds::AWAIT_WITH_TIMEOUT);
            let resolved = logged_value(&entry)?;
            self.advance();
            return Ok(resolved);
        }

        let mut resolved = if condition(&self.state) {
            true
        } else if timeout.is_zero() || self.timer_elapsed(timeout).await? {
            false
        } else {
            return Err(Halt::Suspended);
        };

        if !self.replaying {
            let landed = self
                .record(step_kinds::AWAIT_WITH_TIMEOUT, Value::Bool(resolved))
                .await?;
            resolved = logged_value(&landed)?;
        }
        self.advance();
        Ok(resolved)
    }

    /// Durable delay; resolves `true` once elapsed
    ///
    /// A zero duration resolves immediately and consumes no step. Otherwise
    /// the timer row for this step is created once; the step resolves when
    /// the logical now reaches its fire time and stays suspended until then.
    pub async fn timer(&mut self, duration: Duration) -> Result<bool, Halt> {
        if duration.is_zero() {
            return Ok(true);
        }

        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, step_kinds::TIMER);
            let fired = logged_value(&entry)?;
            self.advance();
            return Ok(fired);
        }

        if !self.timer_elapsed(duration).await? {
            return Err(Halt::Suspended);
        }

        let landed = self.record(step_kinds::TIMER, Value::Bool(true)).await?;
        let fired = logged_value(&landed)?;
        self.advance();
        Ok(fired)
    }

    // ============================================
    // Non-deterministic values
    // ============================================

    /// Run `f` once for this step and replay its logged result ever after
    pub async fn side_effect<T, F>(&mut self, f: F) -> Result<T, Halt>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> T + Send,
    {
        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, step_kinds::SIDE_EFFECT);
            let value = logged_value(&entry)?;
            self.advance();
            return Ok(value);
        }

        let computed = serde_json::to_value(f())?;
        let landed = self.record(step_kinds::SIDE_EFFECT, computed).await?;
        let value = logged_value(&landed)?;
        self.advance();
        Ok(value)
    }

    /// Versioned branch point for evolving workflow code
    ///
    /// The first run logs `max_supported`. A logged version outside
    /// `min_supported..=max_supported` fails the workflow with
    /// `VERSION_NOT_SUPPORTED`.
    pub async fn get_version(
        &mut self,
        change_id: &str,
        min_supported: i32,
        max_supported: i32,
    ) -> Result<i32, Halt> {
        let kind = format!("version:{change_id}");

        let version: i32 = match self.enter_step()? {
            Some(entry) => {
                self.check_kind(&entry, &kind);
                logged_value(&entry)?
            }
            None => {
                let landed = self.record(&kind, Value::from(max_supported)).await?;
                logged_value(&landed)?
            }
        };

        if version < min_supported || version > max_supported {
            return Err(Halt::Failed(WorkflowError::version_not_supported(
                change_id,
                version,
                min_supported,
                max_supported,
            )));
        }

        self.advance();
        Ok(version)
    }

    // ============================================
    // Activities
    // ============================================

    /// Call a typed activity with default options
    pub async fn activity<A: Activity>(
        &mut self,
        input: A::Input,
    ) -> Result<Result<A::Output, ActivityError>, Halt> {
        self.activity_with::<A>(input, ActivityOptions::default())
            .await
    }

    /// Call a typed activity
    pub async fn activity_with<A: Activity>(
        &mut self,
        input: A::Input,
        options: ActivityOptions,
    ) -> Result<Result<A::Output, ActivityError>, Halt> {
        let call = ActivityCall::of::<A>(&input)?.with_options(options);

        match self.call(call).await? {
            Ok(value) => Ok(Ok(serde_json::from_value(value)?)),
            Err(err) => Ok(Err(err)),
        }
    }

    /// Call an activity by type name
    ///
    /// The outer result halts the procedure; the inner one is the
    /// activity's final outcome after retries.
    pub async fn call(&mut self, call: ActivityCall) -> Result<Result<Value, ActivityError>, Halt> {
        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, &call.kind());
            self.advance();
            return Ok(entry.outcome.into_result());
        }

        self.dispatch_activity(call).await?;
        self.advance();
        Err(Halt::Suspended)
    }

    /// Fan out several activities, one step each, and resolve once every
    /// outcome is logged
    pub async fn all(
        &mut self,
        calls: Vec<ActivityCall>,
    ) -> Result<Vec<Result<Value, ActivityError>>, Halt> {
        let mut outcomes = Vec::with_capacity(calls.len());
        let mut pending = 0usize;

        for call in calls {
            match self.enter_step()? {
                Some(entry) => {
                    self.check_kind(&entry, &call.kind());
                    outcomes.push(entry.outcome.into_result());
                }
                None => {
                    self.dispatch_activity(call).await?;
                    pending += 1;
                }
            }
            self.advance();
        }

        if pending > 0 {
            debug!(workflow_id = %self.workflow_id, pending, "waiting on fan-out");
            return Err(Halt::Suspended);
        }
        Ok(outcomes)
    }

    // ============================================
    // Child workflows
    // ============================================

    /// Run a child workflow and wait for its result
    ///
    /// The child's outcome is logged on this step when it finishes.
    pub async fn child<W: Workflow>(
        &mut self,
        input: W::Input,
    ) -> Result<Result<W::Output, WorkflowError>, Halt> {
        let kind = child_kind(W::TYPE);

        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, &kind);
            self.advance();
            return child_result::<W::Output>(entry.outcome);
        }

        let child = self.create_child::<W>(&input).await?;

        // the child finished but its outcome never reached this step
        if let Some(outcome) = self.finished_child_outcome(&child).await? {
            let landed = self.record_outcome(&kind, outcome).await?;
            self.advance();
            return child_result::<W::Output>(landed.outcome);
        }

        self.dispatch_child(&child).await?;
        self.advance();
        Err(Halt::Suspended)
    }

    /// Start a child workflow without waiting for it
    ///
    /// The returned handle can signal the child and later join it.
    pub async fn spawn_child<W: Workflow>(
        &mut self,
        input: W::Input,
    ) -> Result<ChildWorkflowHandle<W>, Halt> {
        let kind = format!("spawn:{}", W::TYPE);

        let child_id: Uuid = match self.enter_step()? {
            Some(entry) => {
                self.check_kind(&entry, &kind);
                let child_id = logged_value(&entry)?;
                if let Some(child) = self.runtime.store.get_workflow(child_id).await? {
                    self.dispatch_child(&child).await?;
                }
                child_id
            }
            None => {
                let child = self.create_child::<W>(&input).await?;
                let landed = self.record(&kind, serde_json::to_value(child.id)?).await?;
                self.dispatch_child(&child).await?;
                logged_value(&landed)?
            }
        };

        let handle = ChildWorkflowHandle::new(child_id, self.index);
        self.advance();
        Ok(handle)
    }

    /// Wait for a spawned child; used by [`ChildWorkflowHandle::join`]
    pub(crate) async fn join_child<W: Workflow>(
        &mut self,
        child_id: Uuid,
    ) -> Result<Result<W::Output, WorkflowError>, Halt> {
        let kind = format!("join:{}", W::TYPE);

        if let Some(entry) = self.enter_step()? {
            self.check_kind(&entry, &kind);
            self.advance();
            return child_result::<W::Output>(entry.outcome);
        }

        let child = self
            .runtime
            .store
            .get_workflow(child_id)
            .await?
            .ok_or(StoreError::WorkflowNotFound(child_id))?;

        match self.finished_child_outcome(&child).await? {
            Some(outcome) => {
                let landed = self.record_outcome(&kind, outcome).await?;
                self.advance();
                child_result::<W::Output>(landed.outcome)
            }
            None => Err(Halt::Suspended),
        }
    }

    /// Signal a child; used by [`ChildWorkflowHandle::signal`]
    ///
    /// Touches only the child's journal. The dedupe key pins the signal to
    /// this point of the parent's procedure so replays do not resend it.
    pub(crate) async fn signal_child(
        &mut self,
        child_id: Uuid,
        signal: WorkflowSignal,
    ) -> Result<(), Halt> {
        let dedupe_key = format!("{}:{}:{}", self.workflow_id, self.index, self.child_signal_seq);
        self.child_signal_seq += 1;

        let appended = self
            .runtime
            .store
            .append_signal(child_id, signal, Some(dedupe_key))
            .await?;

        if appended.was_inserted() {
            self.runtime
                .queue
                .enqueue(
                    QueueMessage::ResumeWorkflow {
                        workflow_id: child_id,
                    },
                    EnqueueOptions::routed(self.routing.clone()),
                )
                .await?;
            debug!(workflow_id = %self.workflow_id, %child_id, "signaled child");
        }
        Ok(())
    }

    // ============================================
    // Internals
    // ============================================

    /// Apply due signals and look up the log for the current index
    fn enter_step(&mut self) -> Result<Option<LogEntry>, Halt> {
        if self.steps >= self.runtime.config.max_steps {
            return Err(Halt::Failed(
                WorkflowError::new(format!(
                    "exceeded {} steps in one invocation",
                    self.runtime.config.max_steps
                ))
                .with_code(error_codes::STEP_LIMIT),
            ));
        }

        let logged = self.history.logged(self.index).cloned();
        let (now, mark) = match &logged {
            Some(entry) => (entry.recorded_at, entry.signal_mark),
            None => (self.invocation_now, self.history.loaded_mark()),
        };

        self.apply_signals_before(mark);
        self.now = now;
        self.replaying = self.history.has_entries_from(self.index);
        Ok(logged)
    }

    fn apply_signals_before(&mut self, mark: u64) {
        for entry in self.history.take_signals_before(mark) {
            (self.apply_signal)(&mut self.state, &entry.signal);
        }
    }

    fn advance(&mut self) {
        self.index += 1;
        self.steps += 1;
        self.child_signal_seq = 0;
    }

    fn check_kind(&self, entry: &LogEntry, expected: &str) {
        if entry.kind != expected {
            warn!(
                workflow_id = %self.workflow_id,
                index = entry.index,
                logged = %entry.kind,
                expected,
                "replay diverged from the event log"
            );
        }
    }

    async fn record(&mut self, kind: &str, value: Value) -> Result<LogEntry, Halt> {
        self.record_outcome(kind, StepOutcome::Completed(value)).await
    }

    async fn record_outcome(&mut self, kind: &str, outcome: StepOutcome) -> Result<LogEntry, Halt> {
        let entry = LogEntry {
            workflow_id: self.workflow_id,
            index: self.index,
            kind: kind.to_string(),
            outcome,
            recorded_at: self.now,
            signal_mark: self.history.mark(),
        };

        let inserted = self.runtime.store.insert_log(entry).await?;
        if !inserted.was_inserted() {
            debug!(
                workflow_id = %self.workflow_id,
                index = self.index,
                "step already logged by another invocation"
            );
        }

        let landed = inserted.into_inner();
        self.apply_signals_before(landed.signal_mark);
        self.history.record(landed.clone());
        Ok(landed)
    }

    /// Get or create this step's timer and check it against logical now,
    /// scheduling a wake-up when it has not fired
    async fn timer_elapsed(&mut self, duration: Duration) -> Result<bool, Halt> {
        let store = &self.runtime.store;
        let timer = match store.get_timer(self.workflow_id, self.index).await? {
            Some(timer) => timer,
            None => store
                .insert_timer(TimerEntry {
                    workflow_id: self.workflow_id,
                    index: self.index,
                    fire_at: after(self.now, duration),
                })
                .await?
                .into_inner(),
        };

        if timer.fire_at <= self.now {
            return Ok(true);
        }

        let delay = until(self.now, timer.fire_at).min(self.runtime.max_delay());
        let queued = self
            .runtime
            .queue
            .enqueue(
                QueueMessage::TimerFired {
                    workflow_id: self.workflow_id,
                    index: self.index,
                    fire_at: timer.fire_at,
                },
                EnqueueOptions::routed(self.routing.clone())
                    .with_delay(delay)
                    .with_unique_key(timer_key(self.workflow_id, self.index)),
            )
            .await?;

        if queued {
            debug!(
                workflow_id = %self.workflow_id,
                index = self.index,
                fire_at = %timer.fire_at,
                ?delay,
                "scheduled timer"
            );
        }
        Ok(false)
    }

    async fn dispatch_activity(&self, call: ActivityCall) -> Result<(), Halt> {
        let routing = call.options.routing.or(&self.routing);
        let task = ActivityTask {
            workflow_id: self.workflow_id,
            index: self.index,
            activity_type: call.activity_type,
            input: call.input,
            options: call.options,
            attempt: 1,
        };
        let activity_type = task.activity_type.clone();

        let queued = self
            .runtime
            .queue
            .enqueue(
                QueueMessage::ExecuteActivity(task),
                EnqueueOptions::routed(routing)
                    .with_unique_key(activity_key(self.workflow_id, self.index)),
            )
            .await?;

        if queued {
            debug!(
                workflow_id = %self.workflow_id,
                index = self.index,
                %activity_type,
                "dispatched activity"
            );
        }
        Ok(())
    }

    /// Create the child instance for this step and link it, both
    /// insert-if-absent
    async fn create_child<W: Workflow>(&self, input: &W::Input) -> Result<WorkflowInstance, Halt> {
        let store = &self.runtime.store;
        let child_id = child_workflow_id(self.workflow_id, self.index);

        let child = store
            .create_workflow(NewWorkflow {
                id: child_id,
                workflow_type: W::TYPE.to_string(),
                input: serde_json::to_value(input)?,
                routing: self.routing.clone(),
                correlation_id: self.correlation_id,
                tags: Vec::new(),
            })
            .await?
            .into_inner();

        store
            .link_child(Relationship {
                parent_workflow_id: self.workflow_id,
                parent_index: self.index,
                parent_now: self.now,
                child_workflow_id: child_id,
            })
            .await?;

        Ok(child)
    }

    /// Move a freshly created child to pending and queue its first run
    async fn dispatch_child(&self, child: &WorkflowInstance) -> Result<(), Halt> {
        if child.status != WorkflowStatus::Created {
            return Ok(());
        }

        match self
            .runtime
            .store
            .transition_status(child.id, WorkflowStatus::Pending)
            .await
        {
            Ok(_) => {}
            // dispatched concurrently
            Err(StoreError::Transition(_)) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        self.runtime
            .queue
            .enqueue(
                QueueMessage::ResumeWorkflow {
                    workflow_id: child.id,
                },
                EnqueueOptions::routed(child.routing.clone()),
            )
            .await?;

        debug!(
            workflow_id = %self.workflow_id,
            child_id = %child.id,
            child_type = %child.workflow_type,
            "dispatched child workflow"
        );
        Ok(())
    }

    async fn finished_child_outcome(
        &self,
        child: &WorkflowInstance,
    ) -> Result<Option<StepOutcome>, Halt> {
        match child.status {
            WorkflowStatus::Completed => Ok(Some(StepOutcome::Completed(
                child.output.clone().unwrap_or(Value::Null),
            ))),
            WorkflowStatus::Failed => {
                let error = self
                    .runtime
                    .store
                    .list_exceptions(child.id)
                    .await?
                    .pop()
                    .map(|record| record.error)
                    .unwrap_or_else(|| {
                        WorkflowError::new("child workflow failed")
                            .with_code(error_codes::CHILD_FAILED)
                    });
                Ok(Some(StepOutcome::Failed(error.into())))
            }
            _ => Ok(None),
        }
    }
}

/// Decode a logged value; a logged failure becomes a workflow failure
fn logged_value<T: DeserializeOwned>(entry: &LogEntry) -> Result<T, Halt> {
    match &entry.outcome {
        StepOutcome::Completed(value) => Ok(serde_json::from_value(value.clone())?),
        StepOutcome::Failed(err) => Err(Halt::Failed(err.clone().into())),
    }
}

fn child_result<T: DeserializeOwned>(
    outcome: StepOutcome,
) -> Result<Result<T, WorkflowError>, Halt> {
    match outcome {
        StepOutcome::Completed(value) => Ok(Ok(serde_json::from_value(value)?)),
        StepOutcome::Failed(err) => Ok(Err(err.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::InMemoryWorkflowStore;
    use crate::queue::InMemoryMessageQueue;

    #[derive(Debug, Default)]
    struct Flags {
        ready: bool,
        pings: u32,
    }

    fn apply(state: &mut Flags, signal: &WorkflowSignal) {
        match signal.name.as_str() {
            "ready" => state.ready = true,
            "ping" => state.pings += 1,
            _ => {}
        }
    }

    struct Harness {
        store: Arc<InMemoryWorkflowStore>,
        queue: Arc<InMemoryMessageQueue>,
        clock: ManualClock,
        config: EngineConfig,
        workflow_id: Uuid,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_config(EngineConfig::default()).await
        }

        async fn with_config(config: EngineConfig) -> Self {
            let clock = ManualClock::starting_now();
            let store = Arc::new(InMemoryWorkflowStore::with_clock(Arc::new(clock.clone())));
            let queue = Arc::new(InMemoryMessageQueue::with_clock(Arc::new(clock.clone())));
            let workflow_id = Uuid::now_v7();

            store
                .create_workflow(NewWorkflow {
                    id: workflow_id,
                    workflow_type: "harness".to_string(),
                    input: Value::Null,
                    routing: Routing::default(),
                    correlation_id: None,
                    tags: vec![],
                })
                .await
                .unwrap();

            Self {
                store,
                queue,
                clock,
                config,
                workflow_id,
            }
        }

        /// A fresh invocation, as the executor would build it
        async fn context(&self) -> WorkflowContext<Flags> {
            let now = self.clock.now();
            let instance = self.store.get_workflow(self.workflow_id).await.unwrap().unwrap();
            let logs = self.store.load_logs(self.workflow_id).await.unwrap();
            let signals = self.store.load_signals(self.workflow_id, None).await.unwrap();

            let seed = ContextSeed {
                instance,
                history: History::new(logs, signals),
                invocation_now: now,
                runtime: Runtime {
                    store: self.store.clone(),
                    queue: self.queue.clone(),
                    clock: Arc::new(self.clock.clone()),
                    config: Arc::new(self.config.clone()),
                },
            };
            WorkflowContext::new(seed, Flags::default(), apply)
        }

        async fn signal(&self, name: &str) {
            self.store
                .append_signal(self.workflow_id, WorkflowSignal::named(name), None)
                .await
                .unwrap();
        }

        async fn log(&self, index: u64, kind: &str, value: Value) {
            self.store
                .insert_log(LogEntry::completed(
                    self.workflow_id,
                    index,
                    kind,
                    value,
                    self.clock.now(),
                ))
                .await
                .unwrap();
        }

        fn log_count(&self) -> usize {
            self.store.log_count(self.workflow_id)
        }
    }

    #[tokio::test]
    async fn test_await_suspends_without_writing() {
        let h = Harness::new().await;
        let mut ctx = h.context().await;

        let result = ctx.await_condition(|s| s.ready).await;

        assert!(matches!(result, Err(Halt::Suspended)));
        assert_eq!(ctx.index(), 0);
        assert_eq!(h.log_count(), 0);
    }

    #[tokio::test]
    async fn test_await_resolves_after_signal_and_logs_once() {
        let h = Harness::new().await;
        h.signal("ready").await;

        let mut ctx = h.context().await;
        ctx.await_condition(|s| s.ready).await.unwrap();
        assert_eq!(ctx.index(), 1);
        assert_eq!(h.log_count(), 1);

        // replay answers from the log
        let mut replay = h.context().await;
        replay.await_condition(|s| s.ready).await.unwrap();
        assert_eq!(h.log_count(), 1);
    }

    #[tokio::test]
    async fn test_signals_after_step_resolution_not_applied_before_it() {
        let h = Harness::new().await;
        h.log(0, step_kinds::SIDE_EFFECT, Value::from(1)).await;
        h.clock.advance(Duration::from_secs(1));
        h.signal("ping").await;

        let mut ctx = h.context().await;
        let pings_before = {
            let _: i32 = ctx.side_effect(|| 99).await.unwrap();
            ctx.state().pings
        };
        assert_eq!(pings_before, 0);

        // the next, unlogged step sees it
        let _: i32 = ctx.side_effect(|| 2).await.unwrap();
        assert_eq!(ctx.state().pings, 1);
    }

    #[tokio::test]
    async fn test_signal_appended_mid_invocation_replays_after_the_step() {
        let h = Harness::new().await;
        let mut live = h.context().await;

        // lands after the invocation loaded its journal, stamped the same instant
        h.signal("ping").await;

        let _: i32 = live.side_effect(|| 1).await.unwrap();
        let live_pings = live.state().pings;

        let logged = h.store.get_log(h.workflow_id, 0).await.unwrap().unwrap();
        assert_eq!(logged.signal_mark, 0);

        let mut replay = h.context().await;
        let _: i32 = replay.side_effect(|| 2).await.unwrap();
        assert_eq!(replay.state().pings, live_pings);
        assert_eq!(live_pings, 0);

        // the following step applies it
        let _: i32 = replay.side_effect(|| 3).await.unwrap();
        assert_eq!(replay.state().pings, 1);
        let next = h.store.get_log(h.workflow_id, 1).await.unwrap().unwrap();
        assert_eq!(next.signal_mark, 1);
    }

    #[tokio::test]
    async fn test_replay_honors_signal_mark_of_landed_row() {
        let h = Harness::new().await;
        h.signal("ping").await;
        h.signal("ping").await;
        let entry = LogEntry::completed(
            h.workflow_id,
            0,
            step_kinds::SIDE_EFFECT,
            Value::from(5),
            h.clock.now(),
        );
        h.store.insert_log(entry.with_signal_mark(1)).await.unwrap();

        let mut ctx = h.context().await;
        let value: i32 = ctx.side_effect(|| 0).await.unwrap();

        assert_eq!(value, 5);
        assert_eq!(ctx.state().pings, 1);
    }

    #[tokio::test]
    async fn test_zero_timer_resolves_immediately_without_row() {
        let h = Harness::new().await;
        let mut ctx = h.context().await;

        assert!(ctx.timer(Duration::ZERO).await.unwrap());

        assert_eq!(ctx.index(), 0);
        assert_eq!(h.store.timer_count(h.workflow_id), 0);
        assert_eq!(h.log_count(), 0);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_timer_fires_at_logical_now() {
        let h = Harness::new().await;

        let mut ctx = h.context().await;
        assert!(matches!(
            ctx.timer(Duration::from_secs(30)).await,
            Err(Halt::Suspended)
        ));
        assert_eq!(h.store.timer_count(h.workflow_id), 1);
        assert!(matches!(
            h.queue.messages().as_slice(),
            [QueueMessage::TimerFired { index: 0, .. }]
        ));

        // not yet due: still suspended, no second wake-up queued
        h.clock.advance(Duration::from_secs(29));
        let mut ctx = h.context().await;
        assert!(ctx.timer(Duration::from_secs(30)).await.is_err());
        assert_eq!(h.queue.len(), 1);

        h.clock.advance(Duration::from_secs(1));
        let mut ctx = h.context().await;
        assert!(ctx.timer(Duration::from_secs(30)).await.unwrap());
        assert_eq!(h.log_count(), 1);

        // the fire time is pinned by the row, not the code's duration
        let mut ctx = h.context().await;
        assert!(ctx.timer(Duration::from_secs(3600)).await.unwrap());
        assert_eq!(h.log_count(), 1);
        assert_eq!(h.store.timer_count(h.workflow_id), 1);
    }

    #[tokio::test]
    async fn test_timer_wake_up_capped_at_max_delay() {
        let config = EngineConfig::default().with_max_delay(Duration::from_secs(60));
        let h = Harness::with_config(config).await;
        let start = h.clock.now();

        let mut ctx = h.context().await;
        assert!(ctx.timer(Duration::from_secs(3600)).await.is_err());

        assert_eq!(
            h.queue.next_visible_at(),
            Some(start + chrono::Duration::seconds(60))
        );
    }

    #[tokio::test]
    async fn test_await_with_timeout() {
        let h = Harness::new().await;

        let mut ctx = h.context().await;
        assert!(ctx
            .await_with_timeout(Duration::from_secs(10), |s| s.ready)
            .await
            .is_err());

        h.clock.advance(Duration::from_secs(10));
        let mut ctx = h.context().await;
        let resolved = ctx
            .await_with_timeout(Duration::from_secs(10), |s| s.ready)
            .await
            .unwrap();
        assert!(!resolved);

        // a late signal cannot change a logged timeout
        h.signal("ready").await;
        let mut ctx = h.context().await;
        assert!(!ctx
            .await_with_timeout(Duration::from_secs(10), |s| s.ready)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_await_with_timeout_condition_wins() {
        let h = Harness::new().await;
        h.signal("ready").await;

        let mut ctx = h.context().await;
        let resolved = ctx
            .await_with_timeout(Duration::from_secs(10), |s| s.ready)
            .await
            .unwrap();

        assert!(resolved);
        assert_eq!(h.store.timer_count(h.workflow_id), 0);
    }

    #[tokio::test]
    async fn test_side_effect_not_rerun_on_replay() {
        let h = Harness::new().await;

        let mut ctx = h.context().await;
        let value: u64 = ctx.side_effect(|| 42).await.unwrap();
        assert_eq!(value, 42);

        let mut replay = h.context().await;
        let value: u64 = replay
            .side_effect(|| -> u64 { panic!("side effect re-executed") })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_side_effect_honors_concurrently_landed_value() {
        let h = Harness::new().await;
        let mut ctx = h.context().await;

        // another invocation logs step 0 after this one loaded its history
        h.log(0, step_kinds::SIDE_EFFECT, Value::from(7)).await;

        let value: i32 = ctx.side_effect(|| 8).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(h.log_count(), 1);
    }

    #[tokio::test]
    async fn test_get_version_logs_newest() {
        let h = Harness::new().await;

        let mut ctx = h.context().await;
        assert_eq!(ctx.get_version("pricing", 1, 2).await.unwrap(), 2);

        // a wider window keeps the logged version
        let mut ctx = h.context().await;
        assert_eq!(ctx.get_version("pricing", 1, 5).await.unwrap(), 2);

        // a window excluding it fails
        let mut ctx = h.context().await;
        match ctx.get_version("pricing", 3, 5).await {
            Err(Halt::Failed(err)) => assert!(err.has_code(error_codes::VERSION_NOT_SUPPORTED)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_activity_dispatch_is_deduplicated() {
        let h = Harness::new().await;

        for _ in 0..2 {
            let mut ctx = h.context().await;
            let result = ctx.call(ActivityCall::new("charge", Value::from(5))).await;
            assert!(matches!(result, Err(Halt::Suspended)));
            assert_eq!(ctx.index(), 1);
        }

        assert_eq!(h.queue.len(), 1);
        match h.queue.messages().remove(0) {
            QueueMessage::ExecuteActivity(task) => {
                assert_eq!(task.index, 0);
                assert_eq!(task.activity_type, "charge");
                assert_eq!(task.attempt, 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_logged_activity_failure_is_returned() {
        let h = Harness::new().await;
        h.store
            .insert_log(LogEntry {
                workflow_id: h.workflow_id,
                index: 0,
                kind: "activity:charge".to_string(),
                outcome: StepOutcome::Failed(ActivityError::non_retryable("declined")),
                recorded_at: h.clock.now(),
                signal_mark: 0,
            })
            .await
            .unwrap();

        let mut ctx = h.context().await;
        let outcome = ctx
            .call(ActivityCall::new("charge", Value::Null))
            .await
            .unwrap();

        assert_eq!(outcome.unwrap_err().message, "declined");
    }

    #[tokio::test]
    async fn test_all_waits_for_every_outcome() {
        let h = Harness::new().await;
        let calls = || {
            vec![
                ActivityCall::new("a", Value::Null),
                ActivityCall::new("b", Value::Null),
            ]
        };

        let mut ctx = h.context().await;
        assert!(ctx.all(calls()).await.is_err());
        assert_eq!(ctx.index(), 2);
        assert_eq!(h.queue.len(), 2);

        h.log(1, "activity:b", Value::from("B")).await;
        let mut ctx = h.context().await;
        assert!(ctx.all(calls()).await.is_err());

        h.log(0, "activity:a", Value::from("A")).await;
        let mut ctx = h.context().await;
        let results = ctx.all(calls()).await.unwrap();
        assert_eq!(results, vec![Ok(Value::from("A")), Ok(Value::from("B"))]);
    }

    #[tokio::test]
    async fn test_step_limit() {
        let h = Harness::with_config(EngineConfig::default().with_max_steps(2)).await;
        let mut ctx = h.context().await;

        let _: u8 = ctx.side_effect(|| 1).await.unwrap();
        let _: u8 = ctx.side_effect(|| 2).await.unwrap();

        match ctx.side_effect(|| 3u8).await {
            Err(Halt::Failed(err)) => assert!(err.has_code(error_codes::STEP_LIMIT)),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_child_ids_derive_from_parent_step() {
        let parent = Uuid::now_v7();

        assert_eq!(child_workflow_id(parent, 3), child_workflow_id(parent, 3));
        assert_ne!(child_workflow_id(parent, 3), child_workflow_id(parent, 4));
    }
}
