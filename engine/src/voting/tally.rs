//! Per-round vote tally.
//!
//! Answers are grouped by their normalized form; the first-seen original
//! text is kept for display so the winning answer is returned with the
//! casing the model produced. Invariant: `votes() + discarded() ==
//! generated()`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Why a candidate did not count toward any answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Red-flag score at or above threshold.
    RedFlag,
    /// Answer was empty after normalization (or failed to parse).
    Malformed,
    /// The generation call itself failed.
    Failed,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RedFlag => write!(f, "red_flag"),
            Self::Malformed => write!(f, "malformed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Comparison key for an answer: trimmed, whitespace-collapsed, case-folded.
pub fn normalize_answer(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone)]
struct TallyEntry {
    display: String,
    count: usize,
    first_seen: usize,
}

/// The current leader of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leader {
    /// First-seen original form of the leading answer.
    pub answer: String,
    pub votes: usize,
    /// Lead over the runner-up (equal to `votes` when unopposed).
    pub margin: usize,
}

#[derive(Debug, Clone, Default)]
pub struct VoteTally {
    entries: HashMap<String, TallyEntry>,
    red_flagged: usize,
    malformed: usize,
    failed: usize,
    votes: usize,
}

impl VoteTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one vote for `answer`.
    ///
    /// Returns the answer's new vote count, or `None` when the answer is
    /// empty after normalization (recorded as a malformed discard).
    pub fn record_vote(&mut self, answer: &str) -> Option<usize> {
        let key = normalize_answer(answer);
        if key.is_empty() {
            self.record_discard(DiscardReason::Malformed);
            return None;
        }

        let first_seen = self.entries.len();
        let entry = self.entries.entry(key).or_insert_with(|| TallyEntry {
            display: answer.trim().to_string(),
            count: 0,
            first_seen,
        });
        entry.count += 1;
        self.votes += 1;
        Some(entry.count)
    }

    pub fn record_discard(&mut self, reason: DiscardReason) {
        match reason {
            DiscardReason::RedFlag => self.red_flagged += 1,
            DiscardReason::Malformed => self.malformed += 1,
            DiscardReason::Failed => self.failed += 1,
        }
    }

    pub fn votes(&self) -> usize {
        self.votes
    }

    pub fn discarded(&self) -> usize {
        self.red_flagged + self.malformed + self.failed
    }

    pub fn generated(&self) -> usize {
        self.votes + self.discarded()
    }

    pub fn distinct_answers(&self) -> usize {
        self.entries.len()
    }

    /// Leader and its margin over the runner-up.
    ///
    /// Ties at the top resolve to the earliest-seen answer with margin 0.
    pub fn leader(&self) -> Option<Leader> {
        let mut ranked: Vec<&TallyEntry> = self.entries.values().collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then(a.first_seen.cmp(&b.first_seen)));

        let top = ranked.first()?;
        let second = ranked.get(1).map(|e| e.count).unwrap_or(0);
        Some(Leader {
            answer: top.display.clone(),
            votes: top.count,
            margin: top.count - second,
        })
    }

    /// The leader, if it is ahead of the runner-up by at least `k`.
    pub fn winner(&self, k: usize) -> Option<Leader> {
        self.leader().filter(|l| l.margin >= k)
    }

    pub fn summary(&self, label: &str) -> RoundSummary {
        let leader = self.leader();
        RoundSummary {
            label: label.to_string(),
            votes: self.votes,
            red_flagged: self.red_flagged,
            malformed: self.malformed,
            failed: self.failed,
            distinct_answers: self.entries.len(),
            leader: leader.as_ref().map(|l| l.answer.clone()),
            leader_votes: leader.as_ref().map(|l| l.votes).unwrap_or(0),
            runner_up_votes: leader.as_ref().map(|l| l.votes - l.margin).unwrap_or(0),
        }
    }
}

/// Serializable account of how a round ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub label: String,
    pub votes: usize,
    pub red_flagged: usize,
    pub malformed: usize,
    pub failed: usize,
    pub distinct_answers: usize,
    pub leader: Option<String>,
    pub leader_votes: usize,
    pub runner_up_votes: usize,
}

impl RoundSummary {
    pub fn generated(&self) -> usize {
        self.votes + self.red_flagged + self.malformed + self.failed
    }
}

impl fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} candidates ({} votes, {} red-flagged, {} malformed, {} failed), leader {}–{}",
            self.label,
            self.generated(),
            self.votes,
            self.red_flagged,
            self.malformed,
            self.failed,
            self.leader_votes,
            self.runner_up_votes
        )
    }
}
