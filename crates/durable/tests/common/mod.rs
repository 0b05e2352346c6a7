//! Shared harness for engine integration tests
//!
//! Everything runs in memory against a [`ManualClock`]; delayed messages
//! only become visible once a test advances the clock.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replayflow_durable::prelude::*;
use replayflow_durable::queue::DEFAULT_QUEUE;
use uuid::Uuid;

/// Upper bound on deliveries per drain; hitting it means a message loop
const MAX_DELIVERIES: usize = 10_000;

pub struct Engine {
    pub executor: Arc<WorkflowExecutor>,
    pub store: Arc<InMemoryWorkflowStore>,
    pub queue: Arc<InMemoryMessageQueue>,
    pub clock: ManualClock,
}

impl Engine {
    pub fn new(setup: impl FnOnce(&mut WorkflowExecutor)) -> Self {
        Self::with_config(EngineConfig::default(), setup)
    }

    pub fn with_config(config: EngineConfig, setup: impl FnOnce(&mut WorkflowExecutor)) -> Self {
        let clock = ManualClock::starting_now();
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let store = Arc::new(InMemoryWorkflowStore::with_clock(shared_clock.clone()));
        let queue = Arc::new(InMemoryMessageQueue::with_clock(shared_clock.clone()));
        let locks = Arc::new(InMemoryLockStore::with_clock(shared_clock.clone()));

        let mut executor = WorkflowExecutor::new(store.clone(), queue.clone(), locks)
            .with_config(config)
            .with_clock(shared_clock);
        setup(&mut executor);

        Self {
            executor: Arc::new(executor),
            store,
            queue,
            clock,
        }
    }

    /// Handle every visible message on the default queue until none is
    /// left; returns the number of deliveries handled
    pub async fn drain(&self) -> usize {
        self.drain_queue(DEFAULT_QUEUE).await
    }

    pub async fn drain_queue(&self, queue: &str) -> usize {
        let mut handled = 0;

        loop {
            let deliveries = self.queue.receive(queue, 32).await.unwrap();
            if deliveries.is_empty() {
                return handled;
            }

            for delivery in deliveries {
                let disposition = self.executor.handle(&delivery).await;
                disposition
                    .apply(self.queue.as_ref(), delivery.id)
                    .await
                    .unwrap();

                handled += 1;
                assert!(handled < MAX_DELIVERIES, "queue never settled");
            }
        }
    }

    /// Advance the clock, then drain
    pub async fn advance_and_drain(&self, by: Duration) -> usize {
        self.clock.advance(by);
        self.drain().await
    }

    pub async fn status(&self, workflow_id: Uuid) -> WorkflowStatus {
        self.executor.status(workflow_id).await.unwrap()
    }

    /// Kinds of the logged steps in index order
    pub async fn log_kinds(&self, workflow_id: Uuid) -> Vec<String> {
        self.store
            .load_logs(workflow_id)
            .await
            .unwrap()
            .into_iter()
            .map(|entry| entry.kind)
            .collect()
    }
}

/// Activity returning a fixed string and counting its executions
#[derive(Clone, Default)]
pub struct Echo {
    pub calls: Arc<AtomicUsize>,
}

impl Echo {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Activity for Echo {
    const TYPE: &'static str = "test_activity";
    type Input = ();
    type Output = String;

    async fn execute(&self, _ctx: &ActivityContext, _input: ()) -> Result<String, ActivityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("activity".to_string())
    }
}

/// Activity that fails with a retryable error a fixed number of times
#[derive(Clone)]
pub struct Flaky {
    pub failures: usize,
    pub attempts: Arc<AtomicUsize>,
}

impl Flaky {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Activity for Flaky {
    const TYPE: &'static str = "flaky";
    type Input = ();
    type Output = u32;

    async fn execute(&self, ctx: &ActivityContext, _input: ()) -> Result<u32, ActivityError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(ActivityError::retryable(format!("attempt {attempt} failed")));
        }
        Ok(ctx.attempt)
    }
}
