//! Execution statistics for one top-level run.
//!
//! [`ExecutionStats`] is created fresh by the orchestrator for every run and
//! shared by `Arc` with the voting coordinator and the call sites. Counters
//! only ever grow during a run. [`StatsSnapshot`] is the serializable view
//! handed back to callers once the root node is terminal.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::generator::TokenUsage;

/// Shared reference to an [`ExecutionStats`] accumulator.
pub type SharedStats = Arc<ExecutionStats>;

/// Lock-free run-wide accumulators.
#[derive(Debug, Default)]
pub struct ExecutionStats {
    total_steps: AtomicU64,
    atomic_executions: AtomicU64,
    decompositions: AtomicU64,
    subtasks_created: AtomicU64,
    compositions: AtomicU64,
    votes_cast: AtomicU64,
    red_flags_detected: AtomicU64,
    candidates_generated: AtomicU64,
    malformed_candidates: AtomicU64,
    failed_generations: AtomicU64,
    voting_rounds: AtomicU64,
    unresolved_rounds: AtomicU64,
    degraded_decompositions: AtomicU64,
    depth_limit_hits: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl ExecutionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStats {
        Arc::new(self)
    }

    pub fn record_step(&self) {
        bump(&self.total_steps, 1);
    }

    pub fn record_atomic_execution(&self) {
        bump(&self.atomic_executions, 1);
    }

    pub fn record_decomposition(&self, subtasks: usize) {
        bump(&self.decompositions, 1);
        bump(&self.subtasks_created, subtasks as u64);
    }

    pub fn record_composition(&self) {
        bump(&self.compositions, 1);
    }

    pub fn record_vote(&self) {
        bump(&self.votes_cast, 1);
    }

    pub fn record_red_flag(&self) {
        bump(&self.red_flags_detected, 1);
    }

    pub fn record_malformed(&self) {
        bump(&self.malformed_candidates, 1);
    }

    pub fn record_failed_generation(&self) {
        bump(&self.failed_generations, 1);
    }

    /// One candidate came back from the generator, usable or not.
    pub fn record_candidate(&self, usage: TokenUsage) {
        bump(&self.candidates_generated, 1);
        bump(&self.prompt_tokens, usage.prompt_tokens);
        bump(&self.completion_tokens, usage.completion_tokens);
    }

    pub fn record_round(&self, resolved: bool) {
        bump(&self.voting_rounds, 1);
        if !resolved {
            bump(&self.unresolved_rounds, 1);
        }
    }

    pub fn record_degraded_decomposition(&self) {
        bump(&self.degraded_decompositions, 1);
    }

    pub fn record_depth_limit(&self) {
        bump(&self.depth_limit_hits, 1);
    }

    pub fn votes_cast(&self) -> u64 {
        self.votes_cast.load(Ordering::Relaxed)
    }

    pub fn red_flags_detected(&self) -> u64 {
        self.red_flags_detected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, duration: Duration) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let total_steps = load(&self.total_steps);
        let red_flags_detected = load(&self.red_flags_detected);
        let estimated_error_rate = if total_steps == 0 {
            0.0
        } else {
            red_flags_detected as f64 / total_steps as f64
        };

        StatsSnapshot {
            total_steps,
            atomic_executions: load(&self.atomic_executions),
            decompositions: load(&self.decompositions),
            subtasks_created: load(&self.subtasks_created),
            compositions: load(&self.compositions),
            votes_cast: load(&self.votes_cast),
            red_flags_detected,
            candidates_generated: load(&self.candidates_generated),
            malformed_candidates: load(&self.malformed_candidates),
            failed_generations: load(&self.failed_generations),
            voting_rounds: load(&self.voting_rounds),
            unresolved_rounds: load(&self.unresolved_rounds),
            degraded_decompositions: load(&self.degraded_decompositions),
            depth_limit_hits: load(&self.depth_limit_hits),
            prompt_tokens: load(&self.prompt_tokens),
            completion_tokens: load(&self.completion_tokens),
            duration_ms: duration.as_millis() as u64,
            estimated_error_rate,
        }
    }
}

/// Point-in-time copy of the run statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Task nodes processed (root included).
    pub total_steps: u64,
    pub atomic_executions: u64,
    pub decompositions: u64,
    pub subtasks_created: u64,
    pub compositions: u64,
    /// Candidates counted toward some answer.
    pub votes_cast: u64,
    /// Candidates discarded for scoring at or above the red-flag threshold.
    pub red_flags_detected: u64,
    pub candidates_generated: u64,
    pub malformed_candidates: u64,
    pub failed_generations: u64,
    pub voting_rounds: u64,
    pub unresolved_rounds: u64,
    pub degraded_decompositions: u64,
    pub depth_limit_hits: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub duration_ms: u64,
    /// `red_flags_detected / total_steps`, 0 for an empty run.
    pub estimated_error_rate: f64,
}

impl StatsSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Compact one-line summary for logs.
    pub fn summary_line(&self) -> String {
        format!(
            "{} steps | {} atomic | {} decompositions | {} votes | {} red flags | {} tokens | {}ms",
            self.total_steps,
            self.atomic_executions,
            self.decompositions,
            self.votes_cast,
            self.red_flags_detected,
            self.total_tokens(),
            self.duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_stats_are_zero() {
        let snap = ExecutionStats::new().snapshot(Duration::ZERO);
        assert_eq!(snap, StatsSnapshot::default());
        assert_eq!(snap.estimated_error_rate, 0.0);
    }

    #[test]
    fn test_counters_accumulate() {
        let stats = ExecutionStats::new();
        stats.record_step();
        stats.record_step();
        stats.record_decomposition(3);
        stats.record_vote();
        stats.record_red_flag();
        stats.record_candidate(TokenUsage::new(10, 4));
        stats.record_candidate(TokenUsage::new(6, 2));
        stats.record_round(true);
        stats.record_round(false);

        let snap = stats.snapshot(Duration::from_millis(1500));
        assert_eq!(snap.total_steps, 2);
        assert_eq!(snap.decompositions, 1);
        assert_eq!(snap.subtasks_created, 3);
        assert_eq!(snap.votes_cast, 1);
        assert_eq!(snap.candidates_generated, 2);
        assert_eq!(snap.prompt_tokens, 16);
        assert_eq!(snap.completion_tokens, 6);
        assert_eq!(snap.total_tokens(), 22);
        assert_eq!(snap.voting_rounds, 2);
        assert_eq!(snap.unresolved_rounds, 1);
        assert_eq!(snap.duration_ms, 1500);
        assert!((snap.estimated_error_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_shared_across_threads() {
        let stats = ExecutionStats::new().shared();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        s.record_vote();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.votes_cast(), 400);
    }

    #[test]
    fn test_summary_line() {
        let stats = ExecutionStats::new();
        stats.record_step();
        let line = stats.snapshot(Duration::from_millis(7)).summary_line();
        assert!(line.contains("1 steps"));
        assert!(line.contains("7ms"));
    }
}
