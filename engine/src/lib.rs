//! MAKER Engine Library
//!
//! Solves long multi-step tasks with near-zero end-to-end error by:
//! - recursively decomposing a task into atomic units
//! - settling every decision (split, answer, merge) with first-to-ahead-by-k
//!   voting over independent generations
//! - discarding linguistically uncertain generations before they can vote
//!
//! # Components
//!
//! - [`red_flag`]: uncertainty scoring of a single generation
//! - [`voting`]: the margin-based voting coordinator and its tally
//! - [`decider`]: atomic-or-decompose heuristics with a hard depth limit
//! - [`roles`]: the decompose / execute / compose call sites
//! - [`orchestrator`]: per-node state machines over a task arena
//! - [`stats`]: run-scoped execution counters
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use maker_engine::{EngineConfig, Orchestrator};
//!
//! let orchestrator = Orchestrator::new(Arc::new(my_generator), EngineConfig::default());
//! let report = orchestrator.run("First add 2 and 3, then multiply by 4").await;
//! println!("{}", report.summary_line());
//! ```

pub mod config;
pub mod decider;
pub mod error;
pub mod generator;
pub mod orchestrator;
pub mod prompts;
pub mod red_flag;
pub mod resilience;
pub mod roles;
pub mod state_machine;
pub mod stats;
pub mod tree;
pub mod voting;

pub use config::{ConfigError, EngineConfig};
pub use decider::{DeciderConfig, Decision, DecisionReason, DecompositionDecider};
pub use error::{EngineError, EngineResult, RunNotice, VoteSite};
pub use generator::{Generation, GenerationError, ScriptedGenerator, TextGenerator, TokenUsage};
pub use orchestrator::{Orchestrator, RunReport};
pub use red_flag::{RedFlagAssessment, RedFlagConfig, RedFlagDetector, WeightedPhrase};
pub use resilience::{RetryPolicy, RetryingGenerator};
pub use roles::{CallSites, Decomposition};
pub use state_machine::{IllegalTransition, NodeState, NodeStateMachine, TransitionRecord};
pub use stats::{ExecutionStats, SharedStats, StatsSnapshot};
pub use tree::{NodeId, NodeResult, NodeSnapshot, TaskNode, TaskTree};
pub use voting::{
    Candidate, DiscardReason, RoundBudget, RoundSummary, VoteOutcome, VoteTally,
    VotingCoordinator, VotingError,
};
