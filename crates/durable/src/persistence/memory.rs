//! In-memory implementation of WorkflowStore for testing

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::store::*;
use crate::clock::{Clock, SystemClock};
use crate::state_machine::StateField;
use crate::workflow::{WorkflowSignal, WorkflowStatus};

/// Everything stored for one workflow
struct WorkflowRecord {
    instance: WorkflowInstance,
    logs: BTreeMap<u64, LogEntry>,
    signals: Vec<SignalEntry>,
    timers: BTreeMap<u64, TimerEntry>,
    exceptions: Vec<ExceptionRecord>,
}

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRecord>,
    children: BTreeMap<(Uuid, u64), Relationship>,
    parents: HashMap<Uuid, (Uuid, u64)>,
}

impl Tables {
    fn record(&self, workflow_id: Uuid) -> Result<&WorkflowRecord, StoreError> {
        self.workflows
            .get(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }

    fn record_mut(&mut self, workflow_id: Uuid) -> Result<&mut WorkflowRecord, StoreError> {
        self.workflows
            .get_mut(&workflow_id)
            .ok_or(StoreError::WorkflowNotFound(workflow_id))
    }
}

/// In-memory implementation of WorkflowStore
///
/// Enforces the same uniqueness constraints a relational adapter would, so
/// race handling can be tested without a database. All locks are released
/// before any await point.
///
/// # Example
///
/// ```
/// use replayflow_durable::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// assert_eq!(store.workflow_count(), 0);
/// ```
pub struct InMemoryWorkflowStore {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store stamping rows with `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Get the number of workflows
    pub fn workflow_count(&self) -> usize {
        self.tables.read().workflows.len()
    }

    /// Get the number of log rows of one workflow
    pub fn log_count(&self, workflow_id: Uuid) -> usize {
        self.tables
            .read()
            .workflows
            .get(&workflow_id)
            .map_or(0, |record| record.logs.len())
    }

    /// Get the number of timer rows of one workflow
    pub fn timer_count(&self, workflow_id: Uuid) -> usize {
        self.tables
            .read()
            .workflows
            .get(&workflow_id)
            .map_or(0, |record| record.timers.len())
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        *self.tables.write() = Tables::default();
    }
}

impl Default for InMemoryWorkflowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create_workflow(
        &self,
        workflow: NewWorkflow,
    ) -> Result<InsertOutcome<WorkflowInstance>, StoreError> {
        let mut tables = self.tables.write();

        if let Some(existing) = tables.workflows.get(&workflow.id) {
            return Ok(InsertOutcome::AlreadyPresent(existing.instance.clone()));
        }

        let now = self.clock.now();
        let instance = WorkflowInstance {
            id: workflow.id,
            workflow_type: workflow.workflow_type,
            input: workflow.input,
            output: None,
            status: WorkflowStatus::Created,
            routing: workflow.routing,
            correlation_id: workflow.correlation_id,
            tags: workflow.tags,
            created_at: now,
            updated_at: now,
        };

        tables.workflows.insert(
            instance.id,
            WorkflowRecord {
                instance: instance.clone(),
                logs: BTreeMap::new(),
                signals: Vec::new(),
                timers: BTreeMap::new(),
                exceptions: Vec::new(),
            },
        );

        Ok(InsertOutcome::Inserted(instance))
    }

    async fn get_workflow(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<WorkflowInstance>, StoreError> {
        Ok(self
            .tables
            .read()
            .workflows
            .get(&workflow_id)
            .map(|record| record.instance.clone()))
    }

    async fn transition_status(
        &self,
        workflow_id: Uuid,
        to: WorkflowStatus,
    ) -> Result<WorkflowStatus, StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables.write();
        let instance = &mut tables.record_mut(workflow_id)?.instance;

        let from = instance.status;
        from.check_transition(workflow_id, to)?;
        instance.status = to;
        instance.updated_at = now;

        Ok(from)
    }

    async fn set_output(&self, workflow_id: Uuid, output: Value) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut tables = self.tables.write();
        let instance = &mut tables.record_mut(workflow_id)?.instance;

        instance.output = Some(output);
        instance.updated_at = now;
        Ok(())
    }

    async fn insert_log(&self, entry: LogEntry) -> Result<InsertOutcome<LogEntry>, StoreError> {
        let mut tables = self.tables.write();
        let record = tables.record_mut(entry.workflow_id)?;

        if let Some(existing) = record.logs.get(&entry.index) {
            return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
        }

        record.logs.insert(entry.index, entry.clone());
        Ok(InsertOutcome::Inserted(entry))
    }

    async fn get_log(&self, workflow_id: Uuid, index: u64) -> Result<Option<LogEntry>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.record(workflow_id)?.logs.get(&index).cloned())
    }

    async fn load_logs(&self, workflow_id: Uuid) -> Result<Vec<LogEntry>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.record(workflow_id)?.logs.values().cloned().collect())
    }

    async fn append_signal(
        &self,
        workflow_id: Uuid,
        signal: WorkflowSignal,
        dedupe_key: Option<String>,
    ) -> Result<InsertOutcome<SignalEntry>, StoreError> {
        let received_at = self.clock.now();
        let mut tables = self.tables.write();
        let record = tables.record_mut(workflow_id)?;

        if let Some(key) = dedupe_key.as_deref() {
            let duplicate = record
                .signals
                .iter()
                .find(|s| s.dedupe_key.as_deref() == Some(key));
            if let Some(existing) = duplicate {
                return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
            }
        }

        let entry = SignalEntry {
            workflow_id,
            sequence: record.signals.len() as u64,
            signal,
            received_at,
            dedupe_key,
        };
        record.signals.push(entry.clone());

        Ok(InsertOutcome::Inserted(entry))
    }

    async fn load_signals(
        &self,
        workflow_id: Uuid,
        before: Option<u64>,
    ) -> Result<Vec<SignalEntry>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .record(workflow_id)?
            .signals
            .iter()
            .take_while(|s| before.map_or(true, |mark| s.sequence < mark))
            .cloned()
            .collect())
    }

    async fn next_signal_sequence(&self, workflow_id: Uuid) -> Result<u64, StoreError> {
        let tables = self.tables.read();
        Ok(tables.record(workflow_id)?.signals.len() as u64)
    }

    async fn insert_timer(
        &self,
        timer: TimerEntry,
    ) -> Result<InsertOutcome<TimerEntry>, StoreError> {
        let mut tables = self.tables.write();
        let record = tables.record_mut(timer.workflow_id)?;

        if let Some(existing) = record.timers.get(&timer.index) {
            return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
        }

        record.timers.insert(timer.index, timer.clone());
        Ok(InsertOutcome::Inserted(timer))
    }

    async fn get_timer(
        &self,
        workflow_id: Uuid,
        index: u64,
    ) -> Result<Option<TimerEntry>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.record(workflow_id)?.timers.get(&index).cloned())
    }

    async fn link_child(
        &self,
        relationship: Relationship,
    ) -> Result<InsertOutcome<Relationship>, StoreError> {
        let mut tables = self.tables.write();
        tables.record(relationship.parent_workflow_id)?;
        tables.record(relationship.child_workflow_id)?;

        let key = (relationship.parent_workflow_id, relationship.parent_index);
        if let Some(existing) = tables.children.get(&key) {
            return Ok(InsertOutcome::AlreadyPresent(existing.clone()));
        }

        tables.parents.insert(relationship.child_workflow_id, key);
        tables.children.insert(key, relationship.clone());
        Ok(InsertOutcome::Inserted(relationship))
    }

    async fn find_child(
        &self,
        parent_workflow_id: Uuid,
        parent_index: u64,
    ) -> Result<Option<Relationship>, StoreError> {
        Ok(self
            .tables
            .read()
            .children
            .get(&(parent_workflow_id, parent_index))
            .cloned())
    }

    async fn find_parent(
        &self,
        child_workflow_id: Uuid,
    ) -> Result<Option<Relationship>, StoreError> {
        let tables = self.tables.read();
        Ok(tables
            .parents
            .get(&child_workflow_id)
            .and_then(|key| tables.children.get(key))
            .cloned())
    }

    async fn list_children(
        &self,
        parent_workflow_id: Uuid,
    ) -> Result<Vec<Relationship>, StoreError> {
        Ok(self
            .tables
            .read()
            .children
            .range((parent_workflow_id, 0)..=(parent_workflow_id, u64::MAX))
            .map(|(_, relationship)| relationship.clone())
            .collect())
    }

    async fn record_exception(&self, record: ExceptionRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.record_mut(record.workflow_id)?.exceptions.push(record);
        Ok(())
    }

    async fn list_exceptions(&self, workflow_id: Uuid) -> Result<Vec<ExceptionRecord>, StoreError> {
        let tables = self.tables.read();
        Ok(tables.record(workflow_id)?.exceptions.clone())
    }
}
