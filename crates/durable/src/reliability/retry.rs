//! Activity retry policy

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activity::ActivityError;

/// Backoff schedule for retryable activity failures
///
/// A failed attempt is retried while the error is retryable, its type is not
/// listed in `non_retryable_errors`, and attempts remain. Everything else
/// becomes a failed step outcome that the workflow observes as
/// `Err(ActivityError)`.
///
/// # Example
///
/// ```
/// use replayflow_durable::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(4)
///     .with_initial_interval(Duration::from_millis(500))
///     .with_jitter(0.0);
///
/// assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(500));
/// assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(with = "duration_millis")]
    pub initial_interval: Duration,

    /// Upper bound for any single delay
    #[serde(with = "duration_millis")]
    pub max_interval: Duration,

    /// Multiplier applied per retry
    pub backoff_coefficient: f64,

    /// Jitter factor (0.0-1.0), applied symmetrically
    pub jitter: f64,

    /// Error types that are never retried
    #[serde(default)]
    pub non_retryable_errors: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Exponential backoff: 3 attempts, 1s doubling up to 60s, 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            backoff_coefficient: 2.0,
            jitter: 0.1,
            non_retryable_errors: vec![],
        }
    }

    /// Single attempt
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_interval: Duration::ZERO,
            max_interval: Duration::ZERO,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    /// Constant interval between attempts
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: interval,
            max_interval: interval,
            backoff_coefficient: 1.0,
            jitter: 0.0,
            non_retryable_errors: vec![],
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Set the jitter factor, clamped to 0.0-1.0
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Never retry errors of this type
    pub fn with_non_retryable_error(mut self, error_type: impl Into<String>) -> Self {
        self.non_retryable_errors.push(error_type.into());
        self
    }

    /// Delay before `attempt` (1-based); zero for the first attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let base = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let capped = base.min(self.max_interval.as_secs_f64());

        let jitter_range = capped * self.jitter;
        let delay = if jitter_range > 0.0 {
            let offset = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Check if an error type may be retried
    pub fn should_retry(&self, error_type: Option<&str>) -> bool {
        match error_type {
            Some(error_type) => !self.non_retryable_errors.iter().any(|e| e == error_type),
            None => true,
        }
    }

    /// Check if another attempt is allowed after `current_attempt`
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }

    /// Delay before retrying a failed attempt, or `None` when the failure is
    /// final
    pub fn next_retry(&self, attempt: u32, error: &ActivityError) -> Option<Duration> {
        let retry = error.retryable
            && self.should_retry(error.error_type.as_deref())
            && self.has_attempts_remaining(attempt);

        retry.then(|| self.delay_for_attempt(attempt + 1))
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
