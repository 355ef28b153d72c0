//! The three voting call sites: decompose, execute, compose.
//!
//! They are not separate agents: each builds a prompt, picks how to extract
//! the voted answer from a generation, and hands the resulting candidate
//! source to the shared [`VotingCoordinator`].

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::Semaphore;

use crate::generator::{GenerationError, TextGenerator};
use crate::prompts::{
    composition_prompt, decomposition_prompt, execution_prompt, parse_numbered_list,
    render_numbered_list,
};
use crate::voting::{Candidate, VoteOutcome, VotingCoordinator, VotingResult};

type CandidateFuture = BoxFuture<'static, Result<Candidate, GenerationError>>;

/// Derives the voted answer from raw generation text.
type Extractor = fn(&str) -> String;

fn whole_text(text: &str) -> String {
    text.trim().to_string()
}

/// Canonical rendering of the parsed breakdown; empty when nothing parsed,
/// which the tally discards as malformed.
fn step_list(text: &str) -> String {
    render_numbered_list(&parse_numbered_list(text))
}

/// An agreed subtask list.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub subtasks: Vec<String>,
    pub outcome: VoteOutcome,
}

/// Voting call sites bound to one run's coordinator, generator and
/// generation permits.
pub struct CallSites<'a> {
    coordinator: &'a VotingCoordinator,
    generator: Arc<dyn TextGenerator>,
    permits: Arc<Semaphore>,
}

impl<'a> CallSites<'a> {
    pub fn new(
        coordinator: &'a VotingCoordinator,
        generator: Arc<dyn TextGenerator>,
        permits: Arc<Semaphore>,
    ) -> Self {
        Self {
            coordinator,
            generator,
            permits,
        }
    }

    pub fn coordinator(&self) -> &VotingCoordinator {
        self.coordinator
    }

    /// Vote on a numbered breakdown of `task`. The whole list is the answer,
    /// so proposals only agree when every step matches after normalization.
    pub async fn decompose(
        &self,
        label: &str,
        task: &str,
        depth: usize,
    ) -> VotingResult<Decomposition> {
        let source = self.candidates(decomposition_prompt(task, depth), step_list);
        let outcome = self.coordinator.vote(label, source).await?;
        Ok(Decomposition {
            subtasks: parse_numbered_list(&outcome.answer),
            outcome,
        })
    }

    /// Vote on a direct answer to an atomic task.
    pub async fn execute(&self, label: &str, task: &str) -> VotingResult<VoteOutcome> {
        let source = self.candidates(execution_prompt(task), whole_text);
        self.coordinator.vote(label, source).await
    }

    /// Vote on a merged answer built from ordered subtask results.
    pub async fn compose(
        &self,
        label: &str,
        task: &str,
        subtasks: &[String],
        results: &[String],
    ) -> VotingResult<VoteOutcome> {
        let source = self.candidates(composition_prompt(task, subtasks, results), whole_text);
        self.coordinator.vote(label, source).await
    }

    /// A candidate source for the coordinator: every call issues one
    /// generation for `prompt` under a global permit.
    fn candidates(
        &self,
        prompt: String,
        extract: Extractor,
    ) -> impl Fn() -> CandidateFuture + Send + Sync + 'static {
        let prompt: Arc<str> = prompt.into();
        let generator = Arc::clone(&self.generator);
        let permits = Arc::clone(&self.permits);
        move || {
            let prompt = Arc::clone(&prompt);
            let generator = Arc::clone(&generator);
            let permits = Arc::clone(&permits);
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| GenerationError::Aborted(e.to_string()))?;
                let generation = generator.generate(&prompt).await?;
                let answer = extract(&generation.text);
                Ok(Candidate::new(generation.text, answer, generation.usage))
            }
            .boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ScriptedGenerator;
    use crate::prompts::{COMPOSE_MARKER, DECOMPOSE_MARKER, EXECUTE_MARKER};
    use crate::stats::ExecutionStats;
    use crate::voting::RoundBudget;

    fn coordinator(k: usize) -> VotingCoordinator {
        VotingCoordinator::new(k, RoundBudget::for_k(k), ExecutionStats::new().shared())
    }

    fn sites<'a>(coord: &'a VotingCoordinator, generator: ScriptedGenerator) -> CallSites<'a> {
        CallSites::new(coord, Arc::new(generator), Arc::new(Semaphore::new(4)))
    }

    #[tokio::test]
    async fn test_decompose_votes_on_whole_list() {
        let coord = coordinator(2);
        let generator = ScriptedGenerator::new().with_responses(
            DECOMPOSE_MARKER,
            [
                "Plan:\n1. add\n2. double",
                "1) Add\n2) Double",
                "1. add\n2. double",
            ],
        );
        let d = sites(&coord, generator)
            .decompose("decompose #0", "add then double", 0)
            .await
            .unwrap();
        assert_eq!(d.subtasks, vec!["add", "double"]);
        assert_eq!(d.outcome.votes, 2);
        assert_eq!(d.outcome.candidates_used, 2);
    }

    #[tokio::test]
    async fn test_unparseable_breakdown_is_malformed() {
        let coord = coordinator(1);
        let generator = ScriptedGenerator::new()
            .with_responses(DECOMPOSE_MARKER, ["I would rather not.", "1. a\n2. b"]);
        let d = sites(&coord, generator)
            .decompose("decompose #0", "t", 0)
            .await
            .unwrap();
        assert_eq!(d.outcome.summary.malformed, 1);
        assert_eq!(d.subtasks.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_and_compose_use_their_prompts() {
        let coord = coordinator(1);
        let generator = Arc::new(
            ScriptedGenerator::new()
                .with_response(EXECUTE_MARKER, " 12 ")
                .with_response(COMPOSE_MARKER, "A then B"),
        );
        let sites = CallSites::new(&coord, generator.clone(), Arc::new(Semaphore::new(1)));

        let executed = sites.execute("execute #1", "5 + 7").await.unwrap();
        assert_eq!(executed.answer, "12");

        let subtasks = vec!["a".to_string(), "b".to_string()];
        let results = vec!["A".to_string(), "B".to_string()];
        let composed = sites
            .compose("compose #0", "a and b", &subtasks, &results)
            .await
            .unwrap();
        assert_eq!(composed.answer, "A then B");

        let prompts = generator.prompts();
        assert!(prompts[0].starts_with(EXECUTE_MARKER));
        assert!(prompts[1].starts_with(COMPOSE_MARKER));
    }

    #[tokio::test]
    async fn test_generation_failure_is_a_discard() {
        let coord = coordinator(1);
        let generator = ScriptedGenerator::new()
            .with_failure(EXECUTE_MARKER, GenerationError::RateLimited);
        let err = sites(&coord, generator)
            .execute("execute #0", "t")
            .await
            .unwrap_err();
        assert_eq!(err.summary().failed, RoundBudget::for_k(1).discard_allowance + 1);
    }
}
