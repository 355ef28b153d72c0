//! Margin-based multi-sample voting.
//!
//! Every decision in the engine (how to split a task, what an atomic task's
//! answer is, how to merge subtask results) is settled by drawing
//! independent candidates until one answer leads by `k` votes.
//!
//! # Components
//!
//! - **VoteTally**: normalized answer → count, plus discard counters
//! - **VotingCoordinator**: the first-to-ahead-by-k loop with red-flag
//!   filtering and bounded in-round parallelism

pub mod coordinator;
pub mod tally;

pub use coordinator::{
    Candidate, RoundBudget, VoteOutcome, VotingCoordinator, VotingError, VotingResult,
};
pub use tally::{normalize_answer, DiscardReason, Leader, RoundSummary, VoteTally};
