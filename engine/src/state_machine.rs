//! Per-node state machine — explicit states and legal transition guards.
//!
//! Every task node in the tree owns one [`NodeStateMachine`]. The
//! orchestrator calls `advance()` to move it between states; each call checks
//! the edge against the transition table and appends to the node's log, so
//! the final run report can show exactly how each node was processed.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Lifecycle of a single task node.
///
/// Every node starts at `Pending` and terminates at either `Resolved` or
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Task text and depth known, nothing run yet.
    Pending,
    /// Running the decomposition decider.
    Deciding,
    /// Voting on a subtask list, then running the children.
    Decomposing,
    /// All children resolved; voting on the merged answer.
    Composing,
    /// Voting on a direct answer.
    Executing,
    /// Terminal: carries a result.
    Resolved,
    /// Terminal: carries a failure.
    Failed,
}

impl NodeState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Failed)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Deciding => write!(f, "Deciding"),
            Self::Decomposing => write!(f, "Decomposing"),
            Self::Composing => write!(f, "Composing"),
            Self::Executing => write!(f, "Executing"),
            Self::Resolved => write!(f, "Resolved"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Legal transitions between node states.
///
/// ```text
/// Pending     → Deciding
/// Deciding    → Decomposing | Executing
/// Decomposing → Composing | Executing   (degrade to atomic)
/// Composing   → Resolved
/// Executing   → Resolved
/// any non-terminal → Failed
/// ```
pub fn is_legal_transition(from: NodeState, to: NodeState) -> bool {
    use NodeState::*;

    if to == Failed && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Pending, Deciding)
            | (Deciding, Decomposing)
            | (Deciding, Executing)
            | (Decomposing, Composing)
            | (Decomposing, Executing)
            | (Composing, Resolved)
            | (Executing, Resolved)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: NodeState,
    pub to: NodeState,
    /// Milliseconds since the node's state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: NodeState,
    pub to: NodeState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal node transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

#[derive(Debug, Clone)]
pub struct NodeStateMachine {
    current: NodeState,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl NodeStateMachine {
    /// Create a new state machine at `Pending`.
    pub fn new() -> Self {
        Self {
            current: NodeState::Pending,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> NodeState {
        self.current
    }

    /// Attempt to move to `to`, recording the edge on success.
    pub fn advance(&mut self, to: NodeState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        tracing::debug!(from = %self.current, to = %to, reason, "Node transition");

        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    /// Transition to `Failed`; legal from every non-terminal state.
    pub fn fail(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(NodeState::Failed, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// `"Pending → Executing → Resolved"`.
    pub fn summary(&self) -> String {
        let mut path = vec![NodeState::Pending.to_string()];
        path.extend(self.transitions.iter().map(|t| t.to.to_string()));
        path.join(" → ")
    }
}

impl Default for NodeStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(state: NodeState) -> NodeStateMachine {
        NodeStateMachine {
            current: state,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    #[test]
    fn test_initial_state() {
        let sm = NodeStateMachine::new();
        assert_eq!(sm.current(), NodeState::Pending);
        assert!(!sm.is_terminal());
        assert!(sm.transitions().is_empty());
    }

    #[test]
    fn test_atomic_path() {
        let mut sm = NodeStateMachine::new();
        sm.advance(NodeState::Deciding, None).unwrap();
        sm.advance(NodeState::Executing, Some("simple")).unwrap();
        sm.advance(NodeState::Resolved, None).unwrap();

        assert!(sm.is_terminal());
        assert_eq!(sm.transitions().len(), 3);
        assert_eq!(sm.summary(), "Pending → Deciding → Executing → Resolved");
    }

    #[test]
    fn test_decomposition_path() {
        let mut sm = NodeStateMachine::new();
        sm.advance(NodeState::Deciding, None).unwrap();
        sm.advance(NodeState::Decomposing, Some("length")).unwrap();
        sm.advance(NodeState::Composing, None).unwrap();
        sm.advance(NodeState::Resolved, None).unwrap();
        assert_eq!(sm.current(), NodeState::Resolved);
    }

    #[test]
    fn test_degrade_to_atomic() {
        let mut sm = NodeStateMachine::new();
        sm.advance(NodeState::Deciding, None).unwrap();
        sm.advance(NodeState::Decomposing, None).unwrap();
        sm.advance(NodeState::Executing, Some("decomposition unresolved"))
            .unwrap();
        sm.advance(NodeState::Resolved, None).unwrap();
        assert!(sm.is_terminal());
    }

    #[test]
    fn test_failure_from_any_non_terminal_state() {
        for state in [
            NodeState::Pending,
            NodeState::Deciding,
            NodeState::Decomposing,
            NodeState::Composing,
            NodeState::Executing,
        ] {
            let mut sm = at(state);
            assert!(sm.fail("test failure").is_ok());
            assert_eq!(sm.current(), NodeState::Failed);
        }
    }

    #[test]
    fn test_cannot_leave_terminal() {
        for state in [NodeState::Resolved, NodeState::Failed] {
            let mut sm = at(state);
            let err = sm.advance(NodeState::Executing, None).unwrap_err();
            assert_eq!(err.from, state);
            assert!(sm.fail("nope").is_err());
        }
    }

    #[test]
    fn test_illegal_skips() {
        let mut sm = NodeStateMachine::new();
        let err = sm.advance(NodeState::Executing, None).unwrap_err();
        assert_eq!(err.from, NodeState::Pending);
        assert_eq!(err.to, NodeState::Executing);
        assert!(err.to_string().contains("Pending → Executing"));

        // composing requires a decomposition first
        let mut sm = at(NodeState::Executing);
        assert!(sm.advance(NodeState::Composing, None).is_err());
        // no way back to deciding
        let mut sm = at(NodeState::Decomposing);
        assert!(sm.advance(NodeState::Deciding, None).is_err());
    }

    #[test]
    fn test_transition_record_has_reason() {
        let mut sm = NodeStateMachine::new();
        sm.advance(NodeState::Deciding, Some("root")).unwrap();
        let record = &sm.transitions()[0];
        assert_eq!(record.from, NodeState::Pending);
        assert_eq!(record.to, NodeState::Deciding);
        assert_eq!(record.reason.as_deref(), Some("root"));
    }

    #[test]
    fn test_transition_record_serde_roundtrip() {
        let record = TransitionRecord {
            from: NodeState::Decomposing,
            to: NodeState::Executing,
            elapsed_ms: 42,
            reason: Some("decomposition unresolved".into()),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"decomposing\""));
        let restored: TransitionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, record);
    }
}
