//! First-to-ahead-by-k voting coordinator.
//!
//! One generic primitive serves every decision point in the engine. The
//! caller supplies a closure producing one candidate per call; the
//! coordinator keeps drawing candidates until some answer leads the
//! runner-up by `k` votes or the round budget runs out.
//!
//! ```text
//! loop:
//!   candidate ← generate()
//!   failed?      → discard (failed)
//!   red-flagged? → discard (red_flag)
//!   empty?       → discard (malformed)
//!   else         → tally[normalize(answer)] += 1
//!                  top − second ≥ k → resolved
//!   votes == max_votes or discards > discard_allowance → unresolved
//! ```
//!
//! Up to `parallelism` generations may be in flight at once. Results are
//! folded into the tally by the single task awaiting them, so the stopping
//! rule is evaluated exactly once per candidate. Generations still running
//! when the round resolves are detached and their results ignored.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::generator::{Generation, GenerationError, TokenUsage};
use crate::red_flag::RedFlagDetector;
use crate::stats::SharedStats;

use super::tally::{DiscardReason, RoundSummary, VoteTally};

/// One generation attempt for a single decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Raw generation text, scored for red flags.
    pub text: String,
    /// The value voted on, extracted from `text` by the call site.
    pub answer: String,
    pub usage: TokenUsage,
}

impl Candidate {
    pub fn new(text: impl Into<String>, answer: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            answer: answer.into(),
            usage,
        }
    }

    /// A candidate whose answer is the whole generation.
    pub fn verbatim(generation: Generation) -> Self {
        let answer = generation.text.trim().to_string();
        Self {
            text: generation.text,
            answer,
            usage: generation.usage,
        }
    }
}

/// Candidate budget for a single round.
///
/// Counted votes and discards are budgeted separately so that red-flag
/// retries never eat into the votes needed to reach a margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundBudget {
    pub max_votes: usize,
    pub discard_allowance: usize,
}

impl RoundBudget {
    /// Default budget for margin `k`: `2·(2k−1)` votes, `2k−1` discards.
    pub fn for_k(k: usize) -> Self {
        let base = 2 * k.max(1) - 1;
        Self {
            max_votes: 2 * base,
            discard_allowance: base,
        }
    }

    /// Hard cap on generations launched in one round.
    pub fn max_candidates(&self) -> usize {
        self.max_votes + self.discard_allowance
    }

    /// True once `discarded` goes past the allowance. Up to
    /// `discard_allowance` discards are tolerated; one more ends the round.
    pub fn discards_exhausted(&self, discarded: usize) -> bool {
        discarded > self.discard_allowance
    }

    pub fn votes_exhausted(&self, votes: usize) -> bool {
        votes >= self.max_votes
    }
}

/// A resolved round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoteOutcome {
    /// Winning answer in its first-seen original form.
    pub answer: String,
    pub votes: usize,
    /// Candidates generated up to and including the deciding one.
    pub candidates_used: usize,
    pub margin: usize,
    pub summary: RoundSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VotingError {
    #[error("voting unresolved: {0}")]
    Unresolved(RoundSummary),
}

impl VotingError {
    pub fn summary(&self) -> &RoundSummary {
        match self {
            Self::Unresolved(summary) => summary,
        }
    }
}

pub type VotingResult<T> = Result<T, VotingError>;

/// Runs margin-based consensus rounds.
#[derive(Debug, Clone)]
pub struct VotingCoordinator {
    k: usize,
    budget: RoundBudget,
    parallelism: usize,
    detector: Option<Arc<RedFlagDetector>>,
    stats: SharedStats,
}

impl VotingCoordinator {
    /// Create a coordinator requiring a lead of `k` (at least 1).
    pub fn new(k: usize, budget: RoundBudget, stats: SharedStats) -> Self {
        Self {
            k: k.max(1),
            budget,
            parallelism: 1,
            detector: None,
            stats,
        }
    }

    /// Discard candidates the detector flags. Without a detector nothing is
    /// ever red-flagged.
    pub fn with_red_flags(mut self, detector: Arc<RedFlagDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    /// Maximum generations in flight at once within a round.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn budget(&self) -> RoundBudget {
        self.budget
    }

    pub fn stats(&self) -> &SharedStats {
        &self.stats
    }

    /// Run one round, drawing candidates from `generate`.
    pub async fn vote<F, Fut>(&self, label: &str, generate: F) -> VotingResult<VoteOutcome>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Candidate, GenerationError>> + Send + 'static,
    {
        let max_candidates = self.budget.max_candidates();
        let mut tally = VoteTally::new();
        let mut in_flight = FuturesUnordered::new();
        let mut launched = 0usize;

        debug!(
            round = label,
            k = self.k,
            max_candidates,
            parallelism = self.parallelism,
            "Voting round started"
        );

        loop {
            while in_flight.len() < self.parallelism && launched < max_candidates {
                in_flight.push(tokio::spawn(generate()));
                launched += 1;
            }

            let Some(joined) = in_flight.next().await else {
                break;
            };
            let result = joined.unwrap_or_else(|e| Err(GenerationError::Aborted(e.to_string())));

            if self.fold_candidate(label, &mut tally, result) {
                if let Some(winner) = tally.winner(self.k) {
                    self.stats.record_round(true);
                    let summary = tally.summary(label);
                    info!(
                        round = label,
                        votes = winner.votes,
                        margin = winner.margin,
                        candidates = tally.generated(),
                        "Consensus reached"
                    );
                    return Ok(VoteOutcome {
                        answer: winner.answer,
                        votes: winner.votes,
                        candidates_used: tally.generated(),
                        margin: winner.margin,
                        summary,
                    });
                }
            }

            if self.budget.votes_exhausted(tally.votes())
                || self.budget.discards_exhausted(tally.discarded())
                || tally.generated() >= max_candidates
            {
                break;
            }
        }

        self.stats.record_round(false);
        let summary = tally.summary(label);
        warn!(round = label, %summary, "Voting round unresolved");
        Err(VotingError::Unresolved(summary))
    }

    /// Apply one generation result to the tally. Returns true when it
    /// counted as a vote.
    fn fold_candidate(
        &self,
        label: &str,
        tally: &mut VoteTally,
        result: Result<Candidate, GenerationError>,
    ) -> bool {
        let candidate = match result {
            Ok(c) => c,
            Err(e) => {
                self.stats.record_failed_generation();
                tally.record_discard(DiscardReason::Failed);
                debug!(round = label, error = %e, "Candidate generation failed");
                return false;
            }
        };
        self.stats.record_candidate(candidate.usage);

        if let Some(detector) = &self.detector {
            let score = detector.score(&candidate.text);
            if score >= detector.threshold() {
                self.stats.record_red_flag();
                tally.record_discard(DiscardReason::RedFlag);
                debug!(round = label, score, "Candidate red-flagged");
                return false;
            }
        }

        match tally.record_vote(&candidate.answer) {
            Some(count) => {
                self.stats.record_vote();
                debug!(round = label, count, "Vote counted");
                true
            }
            None => {
                self.stats.record_malformed();
                debug!(round = label, "Candidate answer empty, discarded");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::ExecutionStats;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn coordinator(k: usize) -> VotingCoordinator {
        VotingCoordinator::new(k, RoundBudget::for_k(k), ExecutionStats::new().shared())
            .with_red_flags(Arc::new(RedFlagDetector::default()))
    }

    /// Closure yielding `answers` in order, then repeating the last.
    fn sequence(
        answers: &[&str],
    ) -> impl Fn() -> futures::future::Ready<Result<Candidate, GenerationError>> {
        let answers: Vec<String> = answers.iter().map(|s| s.to_string()).collect();
        let idx = AtomicUsize::new(0);
        move || {
            let i = idx.fetch_add(1, Ordering::SeqCst).min(answers.len() - 1);
            let text = answers[i].clone();
            futures::future::ready(Ok(Candidate::verbatim(Generation::new(
                text,
                TokenUsage::new(5, 1),
            ))))
        }
    }

    #[tokio::test]
    async fn test_identical_candidates_resolve_after_k() {
        for k in 1..=5 {
            let voter = coordinator(k);
            let outcome = voter.vote("execute", sequence(&["42"])).await.unwrap();
            assert_eq!(outcome.answer, "42");
            assert_eq!(outcome.votes, k);
            assert_eq!(outcome.candidates_used, k);
            assert_eq!(voter.stats().votes_cast(), k as u64);
        }
    }

    #[tokio::test]
    async fn test_margin_scenario_resolves_on_fourth() {
        // 12:1 → 12:1/13:1 → 12:2/13:1 (lead 1) → 12:3/13:1 (lead 2)
        let voter = coordinator(2);
        let outcome = voter
            .vote("execute", sequence(&["12", "13", "12", "12"]))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "12");
        assert_eq!(outcome.votes, 3);
        assert_eq!(outcome.candidates_used, 4);
        assert_eq!(outcome.margin, 2);
    }

    #[tokio::test]
    async fn test_early_unopposed_lead_resolves_immediately() {
        let voter = coordinator(2);
        let outcome = voter
            .vote("execute", sequence(&["12", "12", "13", "12"]))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "12");
        assert_eq!(outcome.votes, 2);
        assert_eq!(outcome.candidates_used, 2);
    }

    #[tokio::test]
    async fn test_normalization_merges_votes_and_keeps_casing() {
        let voter = coordinator(2);
        let outcome = voter
            .vote("execute", sequence(&["Paris", " paris ", "PARIS"]))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "Paris");
        assert_eq!(outcome.candidates_used, 2);
    }

    #[tokio::test]
    async fn test_red_flagged_candidates_never_counted() {
        let voter = coordinator(2);
        let hedged = "wait, maybe it's actually 5, hmm, let me reconsider";
        let outcome = voter
            .vote("execute", sequence(&[hedged, "4", hedged, "4"]))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.votes, 2);
        assert_eq!(outcome.candidates_used, 4);
        assert_eq!(outcome.summary.red_flagged, 2);
        assert_eq!(voter.stats().red_flags_detected(), 2);
        assert_eq!(voter.stats().votes_cast(), 2);
    }

    #[tokio::test]
    async fn test_all_red_flagged_exhausts_discard_allowance() {
        let voter = coordinator(2);
        let err = voter
            .vote("execute", sequence(&["hmm, let me reconsider"]))
            .await
            .unwrap_err();
        let summary = err.summary();
        assert_eq!(summary.votes, 0);
        // allowance of 3, the fourth discard ends the round
        assert_eq!(summary.red_flagged, RoundBudget::for_k(2).discard_allowance + 1);
        assert_eq!(summary.generated(), 4);
    }

    #[tokio::test]
    async fn test_discards_past_allowance_end_round_before_votes() {
        let hedged = "hmm, let me reconsider";
        let voter = VotingCoordinator::new(
            2,
            RoundBudget {
                max_votes: 6,
                discard_allowance: 0,
            },
            ExecutionStats::new().shared(),
        )
        .with_red_flags(Arc::new(RedFlagDetector::default()));
        let err = voter
            .vote(
                "execute",
                sequence(&[hedged, hedged, hedged, hedged, hedged, "4", "4"]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.summary().red_flagged, 1);
        assert_eq!(err.summary().votes, 0);

        // default K=2 budget: the vote slots are untouched by the discards
        let voter = coordinator(2);
        let mut answers = vec![hedged; 8];
        answers.extend(["4", "4"]);
        let err = voter.vote("execute", sequence(&answers)).await.unwrap_err();
        assert_eq!(err.summary().red_flagged, 4);
        assert_eq!(err.summary().votes, 0);
    }

    #[tokio::test]
    async fn test_discards_within_allowance_leave_votes_intact() {
        let hedged = "hmm, let me reconsider";
        let voter = coordinator(2);
        let outcome = voter
            .vote("execute", sequence(&[hedged, hedged, hedged, "4", "4"]))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "4");
        assert_eq!(outcome.votes, 2);
        assert_eq!(outcome.summary.red_flagged, 3);
        assert_eq!(outcome.candidates_used, 5);
    }

    #[tokio::test]
    async fn test_red_flagging_disabled_counts_everything() {
        let voter =
            VotingCoordinator::new(2, RoundBudget::for_k(2), ExecutionStats::new().shared());
        let outcome = voter
            .vote("execute", sequence(&["hmm, let me reconsider"]))
            .await
            .unwrap();
        assert_eq!(outcome.votes, 2);
        assert_eq!(voter.stats().red_flags_detected(), 0);
    }

    #[tokio::test]
    async fn test_split_vote_hits_vote_budget() {
        let voter = coordinator(2);
        let flip = AtomicUsize::new(0);
        let err = voter
            .vote("execute", move || {
                let n = flip.fetch_add(1, Ordering::SeqCst);
                let text = if n % 2 == 0 { "yes" } else { "no" };
                futures::future::ready(Ok(Candidate::verbatim(Generation::new(
                    text,
                    TokenUsage::default(),
                ))))
            })
            .await
            .unwrap_err();
        let summary = err.summary();
        assert_eq!(summary.votes, RoundBudget::for_k(2).max_votes);
        assert_eq!(summary.leader_votes, summary.runner_up_votes);
    }

    #[tokio::test]
    async fn test_generation_failures_consume_budget() {
        let voter = coordinator(1);
        let err = voter
            .vote("execute", || {
                futures::future::ready(Err(GenerationError::Transport("down".into())))
            })
            .await
            .unwrap_err();
        let summary = err.summary();
        assert_eq!(summary.failed, RoundBudget::for_k(1).discard_allowance + 1);
        assert_eq!(summary.votes, 0);
    }

    #[tokio::test]
    async fn test_empty_answers_are_malformed() {
        let voter = coordinator(2);
        let outcome = voter
            .vote("decompose", sequence(&["", "  ", "done"]))
            .await
            .unwrap();
        assert_eq!(outcome.answer, "done");
        assert_eq!(outcome.summary.malformed, 2);
        assert_eq!(outcome.candidates_used, 4);
    }

    #[tokio::test]
    async fn test_parallel_round_reaches_same_answer() {
        let voter = coordinator(3).with_parallelism(4);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let outcome = voter
            .vote("execute", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Candidate::verbatim(Generation::new(
                        "7",
                        TokenUsage::default(),
                    )))
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome.answer, "7");
        assert_eq!(outcome.votes, 3);
        assert_eq!(outcome.candidates_used, 3);
        // Stragglers may have been launched but never counted.
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(voter.stats().votes_cast(), 3);
    }

    #[tokio::test]
    async fn test_extracted_answer_is_what_gets_voted() {
        let voter = coordinator(2);
        let texts = Mutex::new(vec!["Result: 9", "The result: 9"]);
        let outcome = voter
            .vote("execute", move || {
                let text = texts.lock().unwrap().pop().unwrap_or("Result: 9");
                let answer = text.rsplit(':').next().unwrap_or("").to_string();
                futures::future::ready(Ok(Candidate::new(text, answer, TokenUsage::default())))
            })
            .await
            .unwrap();
        assert_eq!(outcome.answer, "9");
    }

    #[test]
    fn test_round_budget_defaults() {
        let b = RoundBudget::for_k(3);
        assert_eq!(b.max_votes, 10);
        assert_eq!(b.discard_allowance, 5);
        assert_eq!(b.max_candidates(), 15);

        // k = 0 is treated as 1
        assert_eq!(RoundBudget::for_k(0), RoundBudget::for_k(1));
    }
}
