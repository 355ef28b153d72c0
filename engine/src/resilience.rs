//! Retry with exponential backoff around a [`TextGenerator`].
//!
//! ```text
//! generate()
//!   ├─ Ok                          → return
//!   ├─ Err, not retriable          → return immediately
//!   └─ Err, retriable, budget left → sleep backoff(attempt), try again
//! ```
//!
//! Retries happen inside a single candidate generation, so a voting round
//! sees one result per candidate regardless of how many attempts it took.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::generator::{Generation, GenerationError, TextGenerator};

/// Retry policy for transient generation failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier (2.0 for exponential doubling).
    pub backoff_multiplier: f64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt` (0-indexed; the first attempt waits 0).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let delay =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32 - 1);
        (delay as u64).min(self.max_backoff_ms)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }

    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms(attempt))
    }
}

impl Default for RetryPolicy {
    /// 3 retries, 500ms initial backoff, 2x multiplier, 8s max.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8_000,
        }
    }
}

/// Wraps a generator, retrying errors that [`GenerationError::is_retriable`]
/// classifies as transient.
#[derive(Debug)]
pub struct RetryingGenerator<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G: TextGenerator> RetryingGenerator<G> {
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &G {
        &self.inner
    }
}

#[async_trait]
impl<G: TextGenerator> TextGenerator for RetryingGenerator<G> {
    async fn generate(&self, prompt: &str) -> Result<Generation, GenerationError> {
        let mut retries = 0u32;
        loop {
            match self.inner.generate(prompt).await {
                Ok(generation) => return Ok(generation),
                Err(err) if err.is_retriable() && self.policy.should_retry(retries) => {
                    retries += 1;
                    let delay = self.policy.backoff_duration(retries);
                    warn!(
                        attempt = retries,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
