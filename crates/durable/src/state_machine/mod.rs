//! Transition-guarded finite state machines
//!
//! A state lives in a named field of an entity. Each field type declares its
//! directed transition graph once; a change of state is only permitted when
//! an edge exists from the current state to the target. The workflow
//! lifecycle ([`WorkflowStatus`](crate::workflow::WorkflowStatus)) is one
//! instance of this machine, but nothing here is workflow specific.
//!
//! # Example
//!
//! ```
//! use replayflow_durable::state_machine::{StateField, StateMachine};
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Door {
//!     Open,
//!     Closed,
//! }
//!
//! impl std::fmt::Display for Door {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl StateField for Door {
//!     const FIELD: &'static str = "door";
//!     const TRANSITIONS: &'static [(Self, Self)] = &[(Door::Open, Door::Closed)];
//! }
//!
//! let mut machine = StateMachine::new("house-1", Door::Open);
//! assert!(machine.transition_to(Door::Closed).is_ok());
//! assert!(machine.transition_to(Door::Open).is_err());
//! ```

use std::fmt;

/// Illegal state change
///
/// Carries the entity, field and attempted edge so the failure can be
/// diagnosed from logs alone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot transition {field} of {entity} from `{from}` to `{to}`")]
pub struct TransitionError {
    /// Identifier of the entity owning the field
    pub entity: String,

    /// Name of the state field
    pub field: &'static str,

    /// State the entity was in
    pub from: String,

    /// State that was requested
    pub to: String,
}

/// A state value with a declared transition graph
pub trait StateField: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Name of the field this state is stored in
    const FIELD: &'static str;

    /// Directed edges `(from, to)` of the transition graph
    const TRANSITIONS: &'static [(Self, Self)];

    /// Check whether an edge exists from `self` to `to`
    fn can_transition_to(self, to: Self) -> bool {
        Self::TRANSITIONS
            .iter()
            .any(|&(from, target)| from == self && target == to)
    }

    /// All states reachable from `self` in one transition
    fn transitionable_states(self) -> Vec<Self> {
        Self::TRANSITIONS
            .iter()
            .filter(|(from, _)| *from == self)
            .map(|(_, to)| *to)
            .collect()
    }

    /// Validate a transition of `entity` from `self` to `to`
    fn check_transition(self, entity: impl fmt::Display, to: Self) -> Result<(), TransitionError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(TransitionError {
                entity: entity.to_string(),
                field: Self::FIELD,
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

/// In-memory holder of one entity's state field
#[derive(Debug, Clone)]
pub struct StateMachine<S: StateField> {
    entity: String,
    current: S,
}

impl<S: StateField> StateMachine<S> {
    /// Create a machine for `entity` starting in `initial`
    pub fn new(entity: impl Into<String>, initial: S) -> Self {
        Self {
            entity: entity.into(),
            current: initial,
        }
    }

    /// Entity identifier
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Current state
    pub fn current(&self) -> S {
        self.current
    }

    /// Check whether the machine can move to `to`
    pub fn can_transition_to(&self, to: S) -> bool {
        self.current.can_transition_to(to)
    }

    /// Move to `to`, returning the previous state
    pub fn transition_to(&mut self, to: S) -> Result<S, TransitionError> {
        self.current.check_transition(&self.entity, to)?;
        let previous = self.current;
        self.current = to;
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Business approval flow, unrelated to workflows
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum ApprovalState {
        Draft,
        Submitted,
        Approved,
        Rejected,
    }

    impl fmt::Display for ApprovalState {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                Self::Draft => "draft",
                Self::Submitted => "submitted",
                Self::Approved => "approved",
                Self::Rejected => "rejected",
            };
            f.write_str(name)
        }
    }

    impl StateField for ApprovalState {
        const FIELD: &'static str = "approval";
        const TRANSITIONS: &'static [(Self, Self)] = &[
            (Self::Draft, Self::Submitted),
            (Self::Submitted, Self::Approved),
            (Self::Submitted, Self::Rejected),
            (Self::Rejected, Self::Draft),
        ];
    }

    #[test]
    fn test_allowed_path() {
        let mut machine = StateMachine::new("invoice-7", ApprovalState::Draft);

        assert_eq!(
            machine.transition_to(ApprovalState::Submitted).unwrap(),
            ApprovalState::Draft
        );
        machine.transition_to(ApprovalState::Rejected).unwrap();
        machine.transition_to(ApprovalState::Draft).unwrap();

        assert_eq!(machine.current(), ApprovalState::Draft);
    }

    #[test]
    fn test_illegal_transition_carries_context() {
        let mut machine = StateMachine::new("invoice-7", ApprovalState::Draft);

        let err = machine.transition_to(ApprovalState::Approved).unwrap_err();

        assert_eq!(err.entity, "invoice-7");
        assert_eq!(err.field, "approval");
        assert_eq!(err.from, "draft");
        assert_eq!(err.to, "approved");
        assert_eq!(
            err.to_string(),
            "cannot transition approval of invoice-7 from `draft` to `approved`"
        );
        // state untouched
        assert_eq!(machine.current(), ApprovalState::Draft);
    }

    #[test]
    fn test_transitionable_states() {
        let mut next = ApprovalState::Submitted.transitionable_states();
        next.sort_by_key(|s| s.to_string());

        assert_eq!(next, vec![ApprovalState::Approved, ApprovalState::Rejected]);
        assert!(ApprovalState::Approved.transitionable_states().is_empty());
    }

    #[test]
    fn test_self_loop_requires_edge() {
        assert!(!ApprovalState::Draft.can_transition_to(ApprovalState::Draft));
    }
}
