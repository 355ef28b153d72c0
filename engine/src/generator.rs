//! Text-generation boundary.
//!
//! The engine never talks to a model directly. Every candidate in every
//! voting round comes from a [`TextGenerator`]: submit a prompt, receive a
//! completion plus token usage. The runner crate provides the HTTP-backed
//! implementation; [`ScriptedGenerator`] is a deterministic stand-in for
//! tests and dry runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Token accounting reported by the generation service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
    }
}

/// One completion returned by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

impl Generation {
    pub fn new(text: impl Into<String>, usage: TokenUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Failure of a single generation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("rate limited by generation service")]
    RateLimited,

    #[error("generation service returned no content")]
    EmptyResponse,

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("generation task aborted: {0}")]
    Aborted(String),
}

impl GenerationError {
    /// Whether retrying the same request could plausibly succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited | Self::Aborted(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408,
            Self::EmptyResponse | Self::Decode(_) => false,
        }
    }
}

/// A service that turns a prompt into a completion.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError>;
}

#[derive(Debug, Clone)]
enum Scripted {
    Text(String),
    Fail(GenerationError),
}

#[derive(Debug)]
struct ScriptRule {
    needle: String,
    responses: VecDeque<Scripted>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Deterministic generator driven by prompt-substring rules.
///
/// Rules are checked in insertion order; the first rule whose needle occurs
/// in the prompt answers. Each rule pops its queued responses in order and
/// keeps repeating the last one once the queue is down to a single entry.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    rules: Mutex<Vec<ScriptRule>>,
    delays: Vec<(String, Duration)>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every prompt containing `needle` with `text`.
    pub fn with_response(self, needle: &str, text: &str) -> Self {
        self.with_responses(needle, [text])
    }

    /// Answer prompts containing `needle` with `texts` in order.
    pub fn with_responses<I, S>(self, needle: &str, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let responses = texts
            .into_iter()
            .map(|t| Scripted::Text(t.into()))
            .collect();
        self.push_rule(needle, responses)
    }

    /// Fail every prompt containing `needle` with `error`.
    pub fn with_failure(self, needle: &str, error: GenerationError) -> Self {
        self.push_rule(needle, VecDeque::from([Scripted::Fail(error)]))
    }

    /// Sleep before answering prompts containing `needle`.
    pub fn with_delay(mut self, needle: &str, delay: Duration) -> Self {
        self.delays.push((needle.to_string(), delay));
        self
    }

    /// Response used when no rule matches.
    pub fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = Some(text.to_string());
        self
    }

    fn push_rule(self, needle: &str, responses: VecDeque<Scripted>) -> Self {
        lock(&self.rules).push(ScriptRule {
            needle: needle.to_string(),
            responses,
        });
        self
    }

    /// Number of generate calls made so far.
    pub fn calls(&self) -> usize {
        lock(&self.prompts).len()
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }

    fn next_response(&self, prompt: &str) -> Option<Scripted> {
        let mut rules = lock(&self.rules);
        let rule = rules
            .iter_mut()
            .find(|r| prompt.contains(&r.needle) && !r.responses.is_empty())?;
        if rule.responses.len() > 1 {
            rule.responses.pop_front()
        } else {
            rule.responses.front().cloned()
        }
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError> {
        lock(&self.prompts).push(prompt.to_string());

        let delay = self
            .delays
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, d)| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let response = match self.next_response(prompt) {
            Some(r) => r,
            None => Scripted::Text(self.fallback.clone().ok_or(GenerationError::EmptyResponse)?),
        };

        match response {
            Scripted::Text(text) => {
                let usage = TokenUsage::new(
                    prompt.split_whitespace().count() as u64,
                    text.split_whitespace().count() as u64,
                );
                Ok(Generation::new(text, usage))
            }
            Scripted::Fail(err) => Err(err),
        }
    }
}
