//! Orchestrator — recursive decomposition driven by voting.
//!
//! Each task node walks its own state machine:
//!
//! ```text
//! Pending → Deciding ─┬─ Decomposing ─┬─ [children] → Composing → Resolved
//!                     │               └─ (degraded) ─┐
//!                     └──────────────── Executing ◄──┘ → Resolved
//! any non-terminal → Failed
//! ```
//!
//! Children of a node run concurrently up to `max_concurrent_subtasks` and
//! their results are composed in decomposition order. The first failed
//! child fails its unfinished siblings and the parent; nothing is ever
//! composed from an incomplete set of results.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::decider::{DecisionReason, DecompositionDecider};
use crate::error::{EngineError, EngineResult, RunNotice, VoteSite};
use crate::generator::TextGenerator;
use crate::red_flag::RedFlagDetector;
use crate::roles::CallSites;
use crate::state_machine::NodeState;
use crate::stats::{ExecutionStats, SharedStats, StatsSnapshot};
use crate::tree::{NodeId, NodeResult, NodeSnapshot, TaskTree};
use crate::voting::{VotingCoordinator, VotingError};

/// Outcome of one top-level run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    pub answer: Option<String>,
    /// Display form of the failure, when the run failed.
    pub error: Option<String>,
    pub stats: StatsSnapshot,
    pub notices: Vec<RunNotice>,
    pub nodes: Vec<NodeSnapshot>,
    /// Typed failure for in-process callers.
    #[serde(skip)]
    pub failure: Option<EngineError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn summary_line(&self) -> String {
        let status = if self.success { "resolved" } else { "failed" };
        format!("run {} {status}: {}", self.run_id, self.stats.summary_line())
    }
}

/// Solves tasks against one text-generation service.
pub struct Orchestrator {
    generator: Arc<dyn TextGenerator>,
    config: EngineConfig,
    decider: DecompositionDecider,
    detector: Option<Arc<RedFlagDetector>>,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn TextGenerator>, config: EngineConfig) -> Self {
        let decider = DecompositionDecider::new(config.decider.clone());
        let detector = config
            .enable_red_flagging
            .then(|| Arc::new(RedFlagDetector::new(config.red_flag.clone())));
        Self {
            generator,
            config,
            decider,
            detector,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Solve `task` from scratch. Statistics are fresh for every call.
    ///
    /// Never fails as a function: a failed run is reported with
    /// `success == false` and the statistics gathered up to the failure.
    pub async fn run(&self, task: &str) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();
        let stats = ExecutionStats::new().shared();

        let mut coordinator =
            VotingCoordinator::new(self.config.voting_k, self.config.round_budget(), stats.clone())
                .with_parallelism(self.config.parallelism());
        if let Some(detector) = &self.detector {
            coordinator = coordinator.with_red_flags(Arc::clone(detector));
        }
        let permits = Arc::new(Semaphore::new(self.config.generation_permits()));

        let mut tree = TaskTree::new();
        let root = tree.add_root(task);

        let run = Run {
            sites: CallSites::new(&coordinator, Arc::clone(&self.generator), permits),
            decider: &self.decider,
            config: &self.config,
            stats: stats.clone(),
            tree: Mutex::new(tree),
            notices: Mutex::new(Vec::new()),
        };

        info!(
            %run_id,
            k = self.config.voting_k,
            max_depth = self.config.max_decomposition_depth,
            red_flagging = self.config.enable_red_flagging,
            "Run started"
        );

        let result = run.solve(root).await;

        let tree = run.tree.into_inner();
        let notices = run.notices.into_inner();
        let stats = stats.snapshot(clock.elapsed());

        let (answer, failure) = match result {
            Ok(answer) => (Some(answer), None),
            Err(err) => (None, Some(err)),
        };
        match &failure {
            None => info!(%run_id, summary = %stats.summary_line(), "Run resolved"),
            Some(err) => warn!(%run_id, error = %err, summary = %stats.summary_line(), "Run failed"),
        }

        RunReport {
            run_id,
            task: task.to_string(),
            started_at,
            success: failure.is_none(),
            answer,
            error: failure.as_ref().map(|e| e.to_string()),
            stats,
            notices,
            nodes: tree.snapshot(),
            failure,
        }
    }
}

/// State shared by every node of one run.
struct Run<'a> {
    sites: CallSites<'a>,
    decider: &'a DecompositionDecider,
    config: &'a EngineConfig,
    stats: SharedStats,
    tree: Mutex<TaskTree>,
    notices: Mutex<Vec<RunNotice>>,
}

impl Run<'_> {
    /// Drive node `id` to a terminal state, returning its answer.
    fn solve(&self, id: NodeId) -> BoxFuture<'_, EngineResult<String>> {
        async move {
            let result = self.solve_inner(id).await;
            if let Err(err) = &result {
                // Already failed on the normal paths; this catches internal errors.
                if let Err(e) = self.tree.lock().await.fail(id, &err.to_string()) {
                    warn!(node = %id, error = %e, "Could not mark node failed");
                }
            }
            result
        }
        .boxed()
    }

    async fn solve_inner(&self, id: NodeId) -> EngineResult<String> {
        let (task, depth) = {
            let mut tree = self.tree.lock().await;
            tree.advance(id, NodeState::Deciding, None)?;
            let node = tree
                .get(id)
                .ok_or_else(|| EngineError::Internal(format!("unknown node {id}")))?;
            (node.task.clone(), node.depth)
        };
        self.stats.record_step();

        let max_depth = self.config.max_decomposition_depth;
        let decision = self.decider.decide(&task, depth, max_depth);
        debug!(node = %id, depth, reason = %decision.reason, decompose = decision.decompose, "Decided");

        if decision.reason == DecisionReason::DepthLimit {
            self.stats.record_depth_limit();
            // Only worth a notice when the text would otherwise have split.
            if self.decider.should_decompose(&task, 0, 1) {
                info!(node = %id, depth, "Depth limit reached, forcing atomic execution");
                self.notice(RunNotice::DepthLimitReached { node: id, depth })
                    .await;
            }
        }

        if decision.decompose {
            self.transition(id, NodeState::Decomposing, &decision.reason.to_string())
                .await?;
            match self.decompose(id, &task, depth).await {
                Ok(subtasks) => return self.solve_children(id, &task, subtasks).await,
                Err(reason) => {
                    warn!(node = %id, %reason, "Decomposition degraded to atomic execution");
                    self.stats.record_degraded_decomposition();
                    self.notice(RunNotice::DecompositionDegraded {
                        node: id,
                        reason: reason.clone(),
                    })
                    .await;
                    self.transition(id, NodeState::Executing, &reason).await?;
                }
            }
        } else {
            self.transition(id, NodeState::Executing, &decision.reason.to_string())
                .await?;
        }

        self.execute(id, &task).await
    }

    /// Voted subtask list, or the reason to fall back to atomic execution.
    async fn decompose(&self, id: NodeId, task: &str, depth: usize) -> Result<Vec<String>, String> {
        let label = format!("{} {id}", VoteSite::Decompose);
        match self.sites.decompose(&label, task, depth).await {
            Ok(d) if d.subtasks.len() >= 2 => Ok(d.subtasks),
            Ok(d) => Err(format!(
                "decomposition produced {} subtask(s)",
                d.subtasks.len()
            )),
            Err(VotingError::Unresolved(summary)) => Err(format!("unresolved: {summary}")),
        }
    }

    async fn execute(&self, id: NodeId, task: &str) -> EngineResult<String> {
        self.stats.record_atomic_execution();
        let label = format!("{} {id}", VoteSite::Execute);
        match self.sites.execute(&label, task).await {
            Ok(outcome) => {
                self.tree
                    .lock()
                    .await
                    .resolve(id, NodeResult::from(&outcome))?;
                Ok(outcome.answer)
            }
            Err(VotingError::Unresolved(summary)) => {
                self.fail(
                    id,
                    EngineError::VotingUnresolved {
                        node: id,
                        site: VoteSite::Execute,
                        summary,
                    },
                )
                .await
            }
        }
    }

    async fn solve_children(
        &self,
        id: NodeId,
        task: &str,
        subtasks: Vec<String>,
    ) -> EngineResult<String> {
        let children = self.tree.lock().await.add_children(id, &subtasks)?;
        self.stats.record_decomposition(children.len());
        info!(node = %id, subtasks = children.len(), "Task decomposed");

        let mut results = Vec::with_capacity(children.len());
        let mut pending = stream::iter(children.iter().copied())
            .map(move |child| async move { (child, self.solve(child).await) })
            .buffered(self.config.subtask_concurrency());

        while let Some((child, result)) = pending.next().await {
            match result {
                Ok(answer) => results.push(answer),
                Err(err) => {
                    // Drops the in-flight siblings.
                    drop(pending);
                    let failed = self
                        .tree
                        .lock()
                        .await
                        .fail_unfinished(&children, "sibling failed")?;
                    warn!(node = %id, child = %child, siblings_failed = failed, "Subtask failed");
                    return self
                        .fail(
                            id,
                            EngineError::SubtaskFailed {
                                node: id,
                                child,
                                source: Box::new(err),
                            },
                        )
                        .await;
                }
            }
        }

        self.transition(id, NodeState::Composing, "all subtasks resolved")
            .await?;
        let label = format!("{} {id}", VoteSite::Compose);
        match self.sites.compose(&label, task, &subtasks, &results).await {
            Ok(outcome) => {
                self.stats.record_composition();
                self.tree
                    .lock()
                    .await
                    .resolve(id, NodeResult::from(&outcome))?;
                Ok(outcome.answer)
            }
            Err(VotingError::Unresolved(summary)) => {
                self.fail(
                    id,
                    EngineError::VotingUnresolved {
                        node: id,
                        site: VoteSite::Compose,
                        summary,
                    },
                )
                .await
            }
        }
    }

    async fn transition(&self, id: NodeId, to: NodeState, reason: &str) -> EngineResult<()> {
        self.tree.lock().await.advance(id, to, Some(reason))
    }

    async fn fail<T>(&self, id: NodeId, err: EngineError) -> EngineResult<T> {
        self.tree.lock().await.fail(id, &err.to_string())?;
        Err(err)
    }

    async fn notice(&self, notice: RunNotice) {
        self.notices.lock().await.push(notice);
    }
}
