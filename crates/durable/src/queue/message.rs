//! Messages carried by the queue transport

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::workflow::ActivityOptions;

/// Queue used when neither the workflow nor the call names one
pub const DEFAULT_QUEUE: &str = "default";

/// Connection/queue routing override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// Transport connection name
    pub connection: Option<String>,

    /// Queue name on that connection
    pub queue: Option<String>,
}

impl Routing {
    /// Route to a named queue
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            connection: None,
            queue: Some(queue.into()),
        }
    }

    /// Effective queue name
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(DEFAULT_QUEUE)
    }

    /// Fill unset fields from `fallback`
    pub fn or(&self, fallback: &Routing) -> Routing {
        Routing {
            connection: self.connection.clone().or_else(|| fallback.connection.clone()),
            queue: self.queue.clone().or_else(|| fallback.queue.clone()),
        }
    }
}

/// An activity job dispatched from a workflow step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityTask {
    pub workflow_id: Uuid,

    /// Step index the outcome is logged under
    pub index: u64,

    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,

    /// 1-based attempt number
    pub attempt: u32,
}

/// Unit of work on the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueMessage {
    /// Re-invoke a workflow
    ResumeWorkflow { workflow_id: Uuid },

    /// A durable timer may have elapsed
    TimerFired {
        workflow_id: Uuid,
        index: u64,
        fire_at: DateTime<Utc>,
    },

    /// Run one activity attempt
    ExecuteActivity(ActivityTask),
}

impl QueueMessage {
    /// Workflow the message belongs to
    pub fn workflow_id(&self) -> Uuid {
        match self {
            Self::ResumeWorkflow { workflow_id } | Self::TimerFired { workflow_id, .. } => {
                *workflow_id
            }
            Self::ExecuteActivity(task) => task.workflow_id,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResumeWorkflow { .. } => "resume_workflow",
            Self::TimerFired { .. } => "timer_fired",
            Self::ExecuteActivity(_) => "execute_activity",
        }
    }
}

/// How a message is enqueued
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    /// Delivery delay; transports cap it at their maximum
    pub delay: Duration,

    /// While a message with this key is queued or in flight, enqueueing
    /// another one with the same key is a no-op
    pub unique_key: Option<String>,

    pub routing: Routing,
}

impl EnqueueOptions {
    pub fn routed(routing: Routing) -> Self {
        Self {
            routing,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_unique_key(mut self, key: impl Into<String>) -> Self {
        self.unique_key = Some(key.into());
        self
    }
}

/// A received message, owned by the receiver until acked or released
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Transport message id
    pub id: Uuid,

    pub message: QueueMessage,

    /// Queue it was received from
    pub queue: String,

    /// Number of times the message has been received, starting at 1
    pub attempt: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_fallback() {
        let call = Routing::queue("payments");
        let workflow = Routing {
            connection: Some("sqs".to_string()),
            queue: Some("orders".to_string()),
        };

        let effective = call.or(&workflow);
        assert_eq!(effective.queue_name(), "payments");
        assert_eq!(effective.connection.as_deref(), Some("sqs"));
        assert_eq!(Routing::default().queue_name(), DEFAULT_QUEUE);
    }

    #[test]
    fn test_message_serialization() {
        let workflow_id = Uuid::now_v7();
        let message = QueueMessage::ResumeWorkflow { workflow_id };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "resume_workflow");

        let parsed: QueueMessage = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.workflow_id(), workflow_id);
    }

    #[test]
    fn test_activity_task_message() {
        let task = ActivityTask {
            workflow_id: Uuid::now_v7(),
            index: 4,
            activity_type: "charge".to_string(),
            input: serde_json::json!({ "cents": 100 }),
            options: ActivityOptions::default(),
            attempt: 1,
        };
        let message = QueueMessage::ExecuteActivity(task.clone());

        assert_eq!(message.kind(), "execute_activity");
        assert_eq!(message.workflow_id(), task.workflow_id);

        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(serde_json::from_str::<QueueMessage>(&json).unwrap(), message);
    }
}
