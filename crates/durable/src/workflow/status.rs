//! Workflow lifecycle status

use serde::{Deserialize, Serialize};

use crate::state_machine::StateField;

/// Lifecycle status of a workflow instance
///
/// ```text
/// created ──► pending ──► running ──► completed
///               ▲          │  ▲  │
///               │          │  │  └──► failed ──┐
///               │          ▼  │         ▲      │
///               │        waiting ───────┘      │
///               └──────────────────────────────┘ (restart)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Persisted, not yet dispatched
    Created,

    /// Dispatched, waiting for its first invocation
    Pending,

    /// An invocation is replaying or executing the procedure
    Running,

    /// Suspended on an unresolved activity, child, timer or condition
    Waiting,

    /// Procedure returned; output recorded
    Completed,

    /// Procedure failed; exception recorded
    Failed,
}

impl WorkflowStatus {
    /// Check if the status is terminal
    ///
    /// `Failed` counts as terminal even though a manual restart may move it
    /// back to `Pending`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Stable string form, as stored
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateField for WorkflowStatus {
    const FIELD: &'static str = "status";
    const TRANSITIONS: &'static [(Self, Self)] = &[
        (Self::Created, Self::Pending),
        (Self::Pending, Self::Running),
        (Self::Running, Self::Completed),
        (Self::Running, Self::Failed),
        (Self::Running, Self::Waiting),
        (Self::Waiting, Self::Running),
        (Self::Waiting, Self::Failed),
        (Self::Failed, Self::Pending),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::StateMachine;

    #[test]
    fn test_happy_path() {
        let mut status = StateMachine::new("wf-1", WorkflowStatus::Created);

        for next in [
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Waiting,
            WorkflowStatus::Running,
            WorkflowStatus::Completed,
        ] {
            status.transition_to(next).unwrap();
        }

        assert!(status.current().is_terminal());
    }

    #[test]
    fn test_completed_is_final() {
        for next in [
            WorkflowStatus::Created,
            WorkflowStatus::Pending,
            WorkflowStatus::Running,
            WorkflowStatus::Waiting,
            WorkflowStatus::Failed,
        ] {
            assert!(!WorkflowStatus::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn test_restart_edge() {
        assert!(WorkflowStatus::Failed.can_transition_to(WorkflowStatus::Pending));
        assert!(!WorkflowStatus::Failed.can_transition_to(WorkflowStatus::Running));
    }

    #[test]
    fn test_pending_cannot_wait() {
        let err = WorkflowStatus::Pending
            .check_transition("wf-2", WorkflowStatus::Waiting)
            .unwrap_err();

        assert_eq!(err.field, "status");
        assert_eq!(err.from, "pending");
        assert_eq!(err.to, "waiting");
    }

    #[test]
    fn test_serialization() {
        let json = serde_json::to_string(&WorkflowStatus::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");
    }
}
