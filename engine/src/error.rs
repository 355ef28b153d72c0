//! Engine error and notice types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tree::NodeId;
use crate::voting::RoundSummary;

/// Which of the three voting call sites a round belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteSite {
    Decompose,
    Execute,
    Compose,
}

impl fmt::Display for VoteSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decompose => write!(f, "decompose"),
            Self::Execute => write!(f, "execute"),
            Self::Compose => write!(f, "compose"),
        }
    }
}

/// Why a node (and possibly the whole run) failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// No answer reached the required margin within the round budget.
    #[error("{site} voting unresolved at node {node}: {summary}")]
    VotingUnresolved {
        node: NodeId,
        site: VoteSite,
        summary: RoundSummary,
    },

    /// A child failed, so the node was never composed.
    #[error("node {node} failed: subtask {child} failed")]
    SubtaskFailed {
        node: NodeId,
        child: NodeId,
        #[source]
        source: Box<EngineError>,
    },

    /// Engine bug, e.g. an illegal state transition.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The error that started the failure chain.
    pub fn root_cause(&self) -> &EngineError {
        match self {
            Self::SubtaskFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl From<crate::state_machine::IllegalTransition> for EngineError {
    fn from(err: crate::state_machine::IllegalTransition) -> Self {
        Self::Internal(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Informational, non-fatal events recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunNotice {
    /// Decomposition voting did not settle (or produced fewer than two
    /// steps); the node was executed atomically instead.
    DecompositionDegraded { node: NodeId, reason: String },
    /// The node sat at the depth limit and was forced atomic.
    DepthLimitReached { node: NodeId, depth: usize },
}

impl fmt::Display for RunNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DecompositionDegraded { node, reason } => {
                write!(f, "node {node}: decomposition degraded to atomic ({reason})")
            }
            Self::DepthLimitReached { node, depth } => {
                write!(f, "node {node}: depth limit reached at depth {depth}")
            }
        }
    }
}
