//! Worker pool consuming one queue
//!
//! Receives deliveries, hands each to the executor with bounded concurrency
//! and settles it according to the returned disposition.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::WorkerPoolConfig;
use crate::engine::WorkflowExecutor;
use crate::queue::{Delivery, MessageQueue, QueueError};

/// Worker pool status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPoolStatus {
    /// Receiving and handling deliveries
    Running,
    /// Finishing in-flight deliveries, not receiving new ones
    Draining,
    Stopped,
}

/// Worker pool errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerPoolError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("worker pool is already running")]
    AlreadyRunning,

    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

/// Worker pool driving a [`WorkflowExecutor`]
///
/// # Example
///
/// ```ignore
/// let executor = Arc::new(executor);
/// let pool = WorkerPool::new(executor, WorkerPoolConfig::from_env());
///
/// pool.start()?;
/// // ...
/// pool.shutdown().await?;
/// ```
pub struct WorkerPool {
    executor: Arc<WorkflowExecutor>,
    config: WorkerPoolConfig,
    shutdown_tx: watch::Sender<bool>,
    status: RwLock<WorkerPoolStatus>,
    active: Arc<Semaphore>,
    poll_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(executor: Arc<WorkflowExecutor>, config: WorkerPoolConfig) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            executor,
            config: WorkerPoolConfig {
                max_concurrency,
                ..config
            },
            shutdown_tx,
            status: RwLock::new(WorkerPoolStatus::Stopped),
            active: Arc::new(Semaphore::new(max_concurrency)),
            poll_handle: Mutex::new(None),
        }
    }

    /// Start the poll loop in the background
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut status = self.status.write();
            if *status != WorkerPoolStatus::Stopped {
                return Err(WorkerPoolError::AlreadyRunning);
            }
            *status = WorkerPoolStatus::Running;
        }
        self.shutdown_tx.send_replace(false);

        info!(
            queue = %self.config.queue,
            max_concurrency = self.config.max_concurrency,
            "starting worker pool"
        );

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.executor),
            self.config.clone(),
            Arc::clone(&self.active),
            self.shutdown_tx.subscribe(),
        ));
        *self.poll_handle.lock() = Some(handle);
        Ok(())
    }

    /// Stop receiving and wait for in-flight deliveries
    #[instrument(skip(self), fields(worker_id = %self.config.worker_id))]
    pub async fn shutdown(&self) -> Result<(), WorkerPoolError> {
        if self.status() == WorkerPoolStatus::Stopped {
            return Ok(());
        }

        info!("initiating graceful shutdown");
        *self.status.write() = WorkerPoolStatus::Draining;
        self.shutdown_tx.send_replace(true);

        let poll_handle = self.poll_handle.lock().take();
        if let Some(handle) = poll_handle {
            if let Err(err) = handle.await {
                error!(error = %err, "poll loop panicked");
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        loop {
            let available = self.active.available_permits();
            if available == self.config.max_concurrency {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    in_flight = self.config.max_concurrency - available,
                    "shutdown timeout reached"
                );
                return Err(WorkerPoolError::ShutdownTimeout);
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        *self.status.write() = WorkerPoolStatus::Stopped;
        info!("worker pool stopped");
        Ok(())
    }

    pub fn status(&self) -> WorkerPoolStatus {
        *self.status.read()
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    /// Deliveries currently being handled
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency - self.active.available_permits()
    }

    /// Receive one batch and handle it inline; returns the number handled
    pub async fn poll_once(&self) -> Result<usize, WorkerPoolError> {
        let queue = self.executor.queue();
        let deliveries = queue
            .receive(&self.config.queue, self.config.batch_size)
            .await?;
        let count = deliveries.len();

        for delivery in deliveries {
            process(&self.executor, delivery).await;
        }
        Ok(count)
    }
}

async fn poll_loop(
    executor: Arc<WorkflowExecutor>,
    config: WorkerPoolConfig,
    active: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let available = active.available_permits().min(config.batch_size);
        let received = if available == 0 {
            Ok(Vec::new())
        } else {
            executor.queue().receive(&config.queue, available).await
        };

        let deliveries = match received {
            Ok(deliveries) => deliveries,
            Err(err) => {
                error!(error = %err, "receive failed");
                Vec::new()
            }
        };

        if deliveries.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown_rx.changed() => {}
            }
            continue;
        }

        for delivery in deliveries {
            let permit = match Arc::clone(&active).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let executor = Arc::clone(&executor);

            tokio::spawn(async move {
                process(&executor, delivery).await;
                drop(permit);
            });
        }
    }

    debug!("poll loop exited");
}

async fn process(executor: &WorkflowExecutor, delivery: Delivery) {
    let delivery_id = delivery.id;
    let disposition = executor.handle(&delivery).await;
    debug!(%delivery_id, ?disposition, "settling delivery");

    if let Err(err) = disposition
        .apply(executor.queue().as_ref(), delivery_id)
        .await
    {
        // visibility timeout redelivers it
        error!(%delivery_id, error = %err, "failed to settle delivery");
    }
}
