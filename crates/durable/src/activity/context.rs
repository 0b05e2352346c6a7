//! Activity execution context

use uuid::Uuid;

/// Context handed to each activity attempt
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Unique execution attempt ID
    pub attempt_id: Uuid,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed
    pub max_attempts: u32,

    /// Workflow that dispatched the activity
    pub workflow_id: Uuid,

    /// Step index the outcome will be logged under
    pub index: u64,

    pub activity_type: String,
}

impl ActivityContext {
    pub fn new(
        workflow_id: Uuid,
        index: u64,
        activity_type: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            attempt_id: Uuid::now_v7(),
            attempt,
            max_attempts,
            workflow_id,
            index,
            activity_type: activity_type.into(),
        }
    }

    /// Stable across attempts of the same step; pass it to external
    /// services so a retried attempt is deduplicated
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.workflow_id, self.index)
    }

    /// Check if this is the last retry attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
