//! Arena of task nodes for one run.
//!
//! Nodes are addressed by [`NodeId`], an index into the arena, and edges are
//! stored as index lists in both directions. Nodes are never removed during
//! a run, so ids stay valid until the tree is dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::state_machine::{NodeState, NodeStateMachine, TransitionRecord};
use crate::voting::VoteOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The agreed answer for a node and how it won.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeResult {
    pub answer: String,
    pub votes: usize,
    pub candidates_used: usize,
}

impl From<&VoteOutcome> for NodeResult {
    fn from(outcome: &VoteOutcome) -> Self {
        Self {
            answer: outcome.answer.clone(),
            votes: outcome.votes,
            candidates_used: outcome.candidates_used,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// In decomposition order.
    pub children: Vec<NodeId>,
    pub task: String,
    pub depth: usize,
    pub machine: NodeStateMachine,
    pub result: Option<NodeResult>,
    pub failure: Option<String>,
}

impl TaskNode {
    pub fn state(&self) -> NodeState {
        self.machine.current()
    }
}

/// Serializable view of a node for run reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub task: String,
    pub depth: usize,
    pub state: NodeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<NodeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub transitions: Vec<TransitionRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskTree {
    nodes: Vec<TaskNode>,
}

impl TaskTree {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, parent: Option<NodeId>, task: &str, depth: usize) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(TaskNode {
            id,
            parent,
            children: Vec::new(),
            task: task.to_string(),
            depth,
            machine: NodeStateMachine::new(),
            result: None,
            failure: None,
        });
        id
    }

    /// Add a parentless node at depth 0.
    pub fn add_root(&mut self, task: &str) -> NodeId {
        self.push(None, task, 0)
    }

    /// Append one child per task under `parent`, one level deeper.
    pub fn add_children(&mut self, parent: NodeId, tasks: &[String]) -> EngineResult<Vec<NodeId>> {
        let depth = self.node(parent)?.depth + 1;
        let ids: Vec<NodeId> = tasks
            .iter()
            .map(|task| self.push(Some(parent), task, depth))
            .collect();
        self.node_mut(parent)?.children.extend(ids.iter().copied());
        Ok(ids)
    }

    pub fn get(&self, id: NodeId) -> Option<&TaskNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut TaskNode> {
        self.nodes.get_mut(id.0)
    }

    fn node(&self, id: NodeId) -> EngineResult<&TaskNode> {
        self.get(id)
            .ok_or_else(|| EngineError::Internal(format!("unknown node {id}")))
    }

    fn node_mut(&mut self, id: NodeId) -> EngineResult<&mut TaskNode> {
        self.get_mut(id)
            .ok_or_else(|| EngineError::Internal(format!("unknown node {id}")))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn advance(&mut self, id: NodeId, to: NodeState, reason: Option<&str>) -> EngineResult<()> {
        self.node_mut(id)?.machine.advance(to, reason)?;
        Ok(())
    }

    /// Move `id` to `Resolved` and attach its result.
    pub fn resolve(&mut self, id: NodeId, result: NodeResult) -> EngineResult<()> {
        let node = self.node_mut(id)?;
        node.machine.advance(NodeState::Resolved, None)?;
        node.result = Some(result);
        Ok(())
    }

    /// Move `id` to `Failed`. A node that is already terminal is left alone.
    pub fn fail(&mut self, id: NodeId, reason: &str) -> EngineResult<()> {
        let node = self.node_mut(id)?;
        if node.machine.is_terminal() {
            return Ok(());
        }
        node.machine.fail(reason)?;
        node.failure = Some(reason.to_string());
        Ok(())
    }

    /// Fail every non-terminal node in the subtrees rooted at `roots`.
    pub fn fail_unfinished(&mut self, roots: &[NodeId], reason: &str) -> EngineResult<usize> {
        let mut stack: Vec<NodeId> = roots.to_vec();
        let mut failed = 0;
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            stack.extend(node.children.iter().copied());
            if !node.machine.is_terminal() {
                self.fail(id, reason)?;
                failed += 1;
            }
        }
        Ok(failed)
    }

    /// Nodes in creation order (the root first).
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes
            .iter()
            .map(|n| NodeSnapshot {
                id: n.id,
                parent: n.parent,
                children: n.children.clone(),
                task: n.task.clone(),
                depth: n.depth,
                state: n.state(),
                result: n.result.clone(),
                failure: n.failure.clone(),
                transitions: n.machine.transitions().to_vec(),
            })
            .collect()
    }
}
