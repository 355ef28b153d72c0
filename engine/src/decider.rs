//! Decomposition decider — is a task atomic or worth splitting?
//!
//! Ordered policy, first match wins:
//!
//! 1. `depth >= max_depth` → atomic (termination guarantee)
//! 2. text longer than `length_threshold` characters → decompose
//! 3. a sequential connective ("then", "next", …) → decompose
//! 4. an enumeration marker ("first", "second", "1.", "2)") → decompose
//! 5. otherwise → atomic
//!
//! False negatives are absorbed by voting redundancy at execution time;
//! false positives only cost extra rounds.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

// "1." / "2)" leading a line, followed by whitespace
static NUMBERED_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)](?:\s|$)").expect("NUMBERED_MARKER_RE regex should compile")
});

/// Tunable decider heuristics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeciderConfig {
    /// Character count above which a task is considered compound.
    pub length_threshold: usize,
    pub connectives: Vec<String>,
    pub enumeration_words: Vec<String>,
}

impl Default for DeciderConfig {
    fn default() -> Self {
        Self {
            length_threshold: 100,
            connectives: ["then", "next", "after", "finally"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            enumeration_words: ["first", "second"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Why the decider routed a task the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    DepthLimit,
    Length,
    Connective,
    Enumeration,
    Simple,
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DepthLimit => write!(f, "depth_limit"),
            Self::Length => write!(f, "length"),
            Self::Connective => write!(f, "connective"),
            Self::Enumeration => write!(f, "enumeration"),
            Self::Simple => write!(f, "simple"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub decompose: bool,
    pub reason: DecisionReason,
}

impl Decision {
    fn atomic(reason: DecisionReason) -> Self {
        Self {
            decompose: false,
            reason,
        }
    }

    fn split(reason: DecisionReason) -> Self {
        Self {
            decompose: true,
            reason,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecompositionDecider {
    config: DeciderConfig,
    connectives: Option<Regex>,
    enumeration: Option<Regex>,
}

/// `(?i)\b(?:a|b|c)\b`, or None for an empty word list.
fn word_alternation(words: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    Regex::new(&format!(r"(?i)\b(?:{})\b", alternatives.join("|"))).ok()
}

impl DecompositionDecider {
    pub fn new(config: DeciderConfig) -> Self {
        let connectives = word_alternation(&config.connectives);
        let enumeration = word_alternation(&config.enumeration_words);
        Self {
            config,
            connectives,
            enumeration,
        }
    }

    pub fn config(&self) -> &DeciderConfig {
        &self.config
    }

    pub fn should_decompose(&self, task: &str, current_depth: usize, max_depth: usize) -> bool {
        self.decide(task, current_depth, max_depth).decompose
    }

    pub fn decide(&self, task: &str, current_depth: usize, max_depth: usize) -> Decision {
        if current_depth >= max_depth {
            return Decision::atomic(DecisionReason::DepthLimit);
        }

        let task = task.trim();
        if task.chars().count() > self.config.length_threshold {
            return Decision::split(DecisionReason::Length);
        }
        if self.connectives.as_ref().is_some_and(|re| re.is_match(task)) {
            return Decision::split(DecisionReason::Connective);
        }
        if self.enumeration.as_ref().is_some_and(|re| re.is_match(task))
            || NUMBERED_MARKER_RE.is_match(task)
        {
            return Decision::split(DecisionReason::Enumeration);
        }

        Decision::atomic(DecisionReason::Simple)
    }
}

impl Default for DecompositionDecider {
    fn default() -> Self {
        Self::new(DeciderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decider() -> DecompositionDecider {
        DecompositionDecider::default()
    }

    #[test]
    fn test_short_simple_task_is_atomic() {
        let d = decider().decide("What is 5 + 7?", 0, 10);
        assert!(!d.decompose);
        assert_eq!(d.reason, DecisionReason::Simple);
    }

    #[test]
    fn test_long_compound_task_decomposes() {
        let mut task = String::from("First gather the quarterly figures for every region, ");
        task.push_str("then compute the totals and averages, and report the outliers clearly.");
        while task.chars().count() < 150 {
            task.push('.');
        }
        assert_eq!(task.chars().count(), 150);
        assert!(decider().should_decompose(&task, 0, 10));
    }

    #[test]
    fn test_depth_limit_always_atomic() {
        let d = decider();
        let compound = "First do A, then do B, next do C, finally do D. ".repeat(5);
        for max_depth in [0, 1, 5, 10] {
            let decision = d.decide(&compound, max_depth, max_depth);
            assert!(!decision.decompose);
            assert_eq!(decision.reason, DecisionReason::DepthLimit);
            assert!(!d.should_decompose(&compound, max_depth + 1, max_depth));
        }
    }

    #[test]
    fn test_connective_triggers() {
        let d = decider();
        assert_eq!(
            d.decide("Boil water then add pasta", 0, 10).reason,
            DecisionReason::Connective
        );
        assert_eq!(
            d.decide("Finally, sign it", 0, 10).reason,
            DecisionReason::Connective
        );
        // substring inside another word is not a connective
        assert!(!d.should_decompose("Add the authentic flavour", 0, 10));
    }

    #[test]
    fn test_enumeration_triggers() {
        let d = decider();
        assert_eq!(
            d.decide("First, sort the list", 0, 10).reason,
            DecisionReason::Enumeration
        );
        assert_eq!(
            d.decide("1. sort 2. dedupe", 0, 10).reason,
            DecisionReason::Enumeration
        );
        assert_eq!(
            d.decide("steps:\n1) sort\n2) dedupe", 0, 10).reason,
            DecisionReason::Enumeration
        );
        // decimal numbers are not list markers
        assert!(!d.should_decompose("Multiply 1.5 by 2", 0, 10));
    }

    #[test]
    fn test_sentence_ending_number_is_not_a_marker() {
        let d = decider();
        for task in ["What is 5 + 7.", "Round the value to 2.", "Pick option 3) please"] {
            assert_eq!(
                d.decide(task, 0, 10),
                Decision {
                    decompose: false,
                    reason: DecisionReason::Simple
                },
                "{task}"
            );
        }
        assert_eq!(
            d.decide("  3. indented item", 0, 10).reason,
            DecisionReason::Enumeration
        );
    }

    #[test]
    fn test_length_threshold_is_strict() {
        let d = decider();
        let exactly = "a".repeat(100);
        assert!(!d.should_decompose(&exactly, 0, 10));
        let over = "a".repeat(101);
        assert_eq!(d.decide(&over, 0, 10).reason, DecisionReason::Length);
    }

    #[test]
    fn test_custom_config() {
        let d = DecompositionDecider::new(DeciderConfig {
            length_threshold: 10_000,
            connectives: vec![],
            enumeration_words: vec!["step".into()],
        });
        assert!(!d.should_decompose("do this then that", 0, 10));
        assert!(d.should_decompose("step one", 0, 10));
    }
}
