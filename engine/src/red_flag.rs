//! Red-flag detection — score a generation for linguistic uncertainty.
//!
//! A candidate that hedges, backtracks, or loops over the same sentence is
//! more likely to be wrong than one that states an answer plainly. Such
//! candidates are discarded before they can vote.
//!
//! # Scoring
//!
//! ```text
//! score = Σ weight(phrase) for each uncertainty phrase present
//!       + circular_penalty   if duplicate-sentence ratio ≥ circular_ratio
//!       + threshold          if the response exceeds max_response_chars
//! ```
//!
//! A candidate is flagged when `score >= threshold`.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// An uncertainty marker and the score it contributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedPhrase {
    pub phrase: String,
    pub weight: f64,
}

impl WeightedPhrase {
    pub fn new(phrase: &str, weight: f64) -> Self {
        Self {
            phrase: phrase.to_string(),
            weight,
        }
    }
}

const STRONG: f64 = 1.0;
const MODERATE: f64 = 0.5;
const WEAK: f64 = 0.3;

fn default_phrases() -> Vec<WeightedPhrase> {
    let strong = [
        "let me reconsider",
        "on second thought",
        "i'm not sure",
        "i am not sure",
        "i made a mistake",
        "wait, no",
        "scratch that",
    ];
    let moderate = ["actually", "wait", "maybe", "perhaps", "i think", "not certain"];
    let weak = ["hmm", "possibly", "probably", "might be", "seems like"];

    strong
        .iter()
        .map(|p| WeightedPhrase::new(p, STRONG))
        .chain(moderate.iter().map(|p| WeightedPhrase::new(p, MODERATE)))
        .chain(weak.iter().map(|p| WeightedPhrase::new(p, WEAK)))
        .collect()
}

/// Tunable red-flag heuristics. The defaults are empirical, not structural.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedFlagConfig {
    /// Score at or above which a candidate is discarded.
    pub threshold: f64,
    /// Uncertainty phrases, matched case-insensitively on word boundaries.
    pub phrases: Vec<WeightedPhrase>,
    /// Fraction of repeated sentences that counts as circular reasoning.
    pub circular_ratio: f64,
    /// Added to the score when circular reasoning is detected.
    pub circular_penalty: f64,
    /// Texts with fewer sentences are never considered circular.
    pub min_sentences_for_circular: usize,
    /// Responses longer than this are flagged outright.
    pub max_response_chars: Option<usize>,
}

impl Default for RedFlagConfig {
    fn default() -> Self {
        Self {
            threshold: 1.0,
            phrases: default_phrases(),
            circular_ratio: 0.7,
            circular_penalty: 2.0,
            min_sentences_for_circular: 2,
            max_response_chars: Some(8000),
        }
    }
}

/// Breakdown of a single red-flag evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedFlagAssessment {
    pub score: f64,
    pub matched: Vec<String>,
    pub circular: bool,
    pub overlong: bool,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Case-insensitive pattern for `phrase`, with a word boundary only on
/// sides where the phrase starts or ends with a word character.
fn phrase_pattern(phrase: &str) -> String {
    let lead = if phrase.starts_with(is_word_char) { r"\b" } else { "" };
    let tail = if phrase.ends_with(is_word_char) { r"\b" } else { "" };
    format!("(?i){lead}{}{tail}", regex::escape(phrase))
}

/// Stateless uncertainty scorer. Patterns are compiled once at construction.
#[derive(Debug, Clone)]
pub struct RedFlagDetector {
    config: RedFlagConfig,
    patterns: Vec<(Regex, WeightedPhrase)>,
}

impl RedFlagDetector {
    pub fn new(config: RedFlagConfig) -> Self {
        let patterns = config
            .phrases
            .iter()
            .filter(|p| !p.phrase.trim().is_empty())
            .filter_map(|p| {
                match Regex::new(&phrase_pattern(p.phrase.trim())) {
                    Ok(re) => Some((re, p.clone())),
                    Err(e) => {
                        warn!(phrase = %p.phrase, error = %e, "Skipping unusable red-flag phrase");
                        None
                    }
                }
            })
            .collect();
        Self { config, patterns }
    }

    pub fn config(&self) -> &RedFlagConfig {
        &self.config
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Uncertainty score in `[0, ∞)`. Empty text scores 0.
    pub fn score(&self, text: &str) -> f64 {
        self.assess(text).score
    }

    /// Whether the text scores at or above the threshold.
    pub fn is_flagged(&self, text: &str) -> bool {
        self.score(text) >= self.config.threshold
    }

    pub fn assess(&self, text: &str) -> RedFlagAssessment {
        let mut assessment = RedFlagAssessment {
            score: 0.0,
            matched: Vec::new(),
            circular: false,
            overlong: false,
        };
        if text.trim().is_empty() {
            return assessment;
        }

        // Models emit typographic apostrophes as often as ASCII ones.
        let text = text.replace('\u{2019}', "'");

        for (re, phrase) in &self.patterns {
            if re.is_match(&text) {
                assessment.score += phrase.weight.max(0.0);
                assessment.matched.push(phrase.phrase.clone());
            }
        }

        let ratio = duplicate_sentence_ratio(&text, self.config.min_sentences_for_circular);
        if ratio >= self.config.circular_ratio {
            assessment.circular = true;
            assessment.score += self.config.circular_penalty;
        }

        if let Some(limit) = self.config.max_response_chars {
            if text.chars().count() > limit {
                assessment.overlong = true;
                assessment.score += self.config.threshold;
            }
        }

        assessment
    }
}

impl Default for RedFlagDetector {
    fn default() -> Self {
        Self::new(RedFlagConfig::default())
    }
}

/// Fraction of sentences that repeat an earlier sentence verbatim.
///
/// Returns 0 when the text has fewer than `min_sentences` sentences.
fn duplicate_sentence_ratio(text: &str, min_sentences: usize) -> f64 {
    let sentences: Vec<String> = text
        .split(['.', '!', '?', '\n'])
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.is_empty() || sentences.len() < min_sentences {
        return 0.0;
    }

    let mut seen = HashSet::new();
    let duplicates = sentences
        .iter()
        .filter(|s| !seen.insert(s.as_str()))
        .count();

    duplicates as f64 / sentences.len() as f64
}
