//! Engine and worker configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lock::OverlapLockConfig;
use crate::queue::{Routing, DEFAULT_MAX_DELAY};
use crate::reliability::duration_millis;

/// Configuration for the execution driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Routing for workflows started without an override
    pub routing: Routing,

    /// Longest delay ever requested from the transport; timers further out
    /// re-schedule themselves
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Reschedule delay when the overlap lock is held elsewhere
    #[serde(with = "duration_millis")]
    pub lock_retry_delay: Duration,

    /// Reschedule delay after a store or transport failure
    #[serde(with = "duration_millis")]
    pub error_retry_delay: Duration,

    /// Upper bound on steps a single invocation may pass through
    pub max_steps: u64,

    /// Lifetime of the overlap lock's compare-and-set mutex
    #[serde(with = "duration_millis")]
    pub lock_mutex_ttl: Duration,

    /// Lifetime of an overlap lock holder that never releases
    #[serde(with = "duration_millis")]
    pub lock_holder_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let lock = OverlapLockConfig::default();
        Self {
            routing: Routing::default(),
            max_delay: DEFAULT_MAX_DELAY,
            lock_retry_delay: Duration::from_secs(5),
            error_retry_delay: Duration::from_secs(10),
            max_steps: 10_000,
            lock_mutex_ttl: lock.mutex_ttl,
            lock_holder_ttl: lock.holder_ttl,
        }
    }
}

impl EngineConfig {
    /// Create configuration from `REPLAYFLOW_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            routing: Routing {
                connection: lookup("REPLAYFLOW_CONNECTION"),
                queue: lookup("REPLAYFLOW_QUEUE"),
            },
            max_delay: parse_var(&lookup, "REPLAYFLOW_MAX_DELAY_SECS")
                .map_or(defaults.max_delay, Duration::from_secs),
            lock_retry_delay: parse_var(&lookup, "REPLAYFLOW_LOCK_RETRY_MS")
                .map_or(defaults.lock_retry_delay, Duration::from_millis),
            error_retry_delay: parse_var(&lookup, "REPLAYFLOW_ERROR_RETRY_MS")
                .map_or(defaults.error_retry_delay, Duration::from_millis),
            max_steps: parse_var(&lookup, "REPLAYFLOW_MAX_STEPS")
                .unwrap_or(defaults.max_steps),
            lock_mutex_ttl: parse_var(&lookup, "REPLAYFLOW_LOCK_MUTEX_TTL_MS")
                .map_or(defaults.lock_mutex_ttl, Duration::from_millis),
            lock_holder_ttl: parse_var(&lookup, "REPLAYFLOW_LOCK_HOLDER_TTL_SECS")
                .map_or(defaults.lock_holder_ttl, Duration::from_secs),
        }
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = delay;
        self
    }

    pub fn with_error_retry_delay(mut self, delay: Duration) -> Self {
        self.error_retry_delay = delay;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Overlap lock tunables derived from this configuration
    pub fn lock_config(&self) -> OverlapLockConfig {
        OverlapLockConfig {
            mutex_ttl: self.lock_mutex_ttl,
            holder_ttl: self.lock_holder_ttl,
            ..OverlapLockConfig::default()
        }
    }
}

/// Configuration for the worker pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Worker ID (unique identifier for this worker instance)
    pub worker_id: String,

    /// Queue to consume
    pub queue: String,

    /// Maximum deliveries handled concurrently
    pub max_concurrency: usize,

    /// Poll interval when no messages are available
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// Maximum deliveries received per poll
    pub batch_size: usize,

    /// How long shutdown waits for in-flight deliveries
    #[serde(with = "duration_millis")]
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::now_v7()),
            queue: crate::queue::DEFAULT_QUEUE.to_string(),
            max_concurrency: 10,
            poll_interval: Duration::from_millis(100),
            batch_size: 10,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerPoolConfig {
    /// Create configuration from `REPLAYFLOW_WORKER_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        Self {
            worker_id: lookup("REPLAYFLOW_WORKER_ID").unwrap_or(defaults.worker_id),
            queue: lookup("REPLAYFLOW_WORKER_QUEUE").unwrap_or(defaults.queue),
            max_concurrency: parse_var(&lookup, "REPLAYFLOW_WORKER_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency),
            poll_interval: parse_var(&lookup, "REPLAYFLOW_WORKER_POLL_MS")
                .map_or(defaults.poll_interval, Duration::from_millis),
            batch_size: parse_var(&lookup, "REPLAYFLOW_WORKER_BATCH_SIZE")
                .unwrap_or(defaults.batch_size),
            shutdown_timeout: parse_var(&lookup, "REPLAYFLOW_WORKER_SHUTDOWN_SECS")
                .map_or(defaults.shutdown_timeout, Duration::from_secs),
        }
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Parse a variable; `None` when unset or malformed
fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}
