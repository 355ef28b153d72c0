//! Engine configuration.
//!
//! Values layer as env > TOML file > defaults: [`EngineConfig::load`] reads
//! the optional file, applies `MAKER_*` overrides, then validates.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::decider::DeciderConfig;
use crate::red_flag::RedFlagConfig;
use crate::voting::RoundBudget;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Required lead of the winning answer over the runner-up.
    pub voting_k: usize,
    /// When false, no candidate is ever discarded as red-flagged.
    pub enable_red_flagging: bool,
    /// Nodes at this depth are always executed atomically.
    pub max_decomposition_depth: usize,
    /// Counted votes per round; defaults to `2·(2k−1)`.
    pub max_votes_per_round: Option<usize>,
    /// Discarded candidates allowed per round; defaults to `2k−1`.
    pub discard_allowance: Option<usize>,
    /// Generations in flight within one round; defaults to `voting_k`.
    pub candidate_parallelism: Option<usize>,
    /// Sibling subtasks processed at once.
    pub max_concurrent_subtasks: usize,
    /// Generations in flight across the whole task tree.
    pub max_in_flight_generations: usize,
    pub red_flag: RedFlagConfig,
    pub decider: DeciderConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            voting_k: 3,
            enable_red_flagging: true,
            max_decomposition_depth: 10,
            max_votes_per_round: None,
            discard_allowance: None,
            candidate_parallelism: None,
            max_concurrent_subtasks: 4,
            max_in_flight_generations: 8,
            red_flag: RedFlagConfig::default(),
            decider: DeciderConfig::default(),
        }
    }
}

fn env_flag(val: &str) -> bool {
    let val = val.trim().to_lowercase();
    val == "true" || val == "1" || val == "yes"
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// File (if any) → env overrides → validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `MAKER_*` environment overrides. Unparseable values are ignored
    /// with a warning.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse_usize(key: &str, val: &str) -> Option<usize> {
            match val.trim().parse() {
                Ok(n) => Some(n),
                Err(_) => {
                    tracing::warn!(key, value = val, "Ignoring non-numeric override");
                    None
                }
            }
        }

        if let Some(val) = lookup("MAKER_VOTING_K") {
            if let Some(n) = parse_usize("MAKER_VOTING_K", &val) {
                self.voting_k = n;
            }
        }
        if let Some(val) = lookup("MAKER_ENABLE_RED_FLAGGING") {
            self.enable_red_flagging = env_flag(&val);
        }
        if let Some(val) = lookup("MAKER_MAX_DECOMPOSITION_DEPTH") {
            if let Some(n) = parse_usize("MAKER_MAX_DECOMPOSITION_DEPTH", &val) {
                self.max_decomposition_depth = n;
            }
        }
        if let Some(val) = lookup("MAKER_CANDIDATE_PARALLELISM") {
            if let Some(n) = parse_usize("MAKER_CANDIDATE_PARALLELISM", &val) {
                self.candidate_parallelism = Some(n);
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.voting_k == 0 {
            return Err(invalid("voting_k", "must be at least 1"));
        }
        if self.max_concurrent_subtasks == 0 {
            return Err(invalid("max_concurrent_subtasks", "must be at least 1"));
        }
        if self.max_in_flight_generations == 0 {
            return Err(invalid("max_in_flight_generations", "must be at least 1"));
        }
        if self.candidate_parallelism == Some(0) {
            return Err(invalid("candidate_parallelism", "must be at least 1"));
        }
        if self.max_votes_per_round.is_some_and(|v| v < self.voting_k) {
            return Err(invalid(
                "max_votes_per_round",
                format!("must be at least voting_k ({})", self.voting_k),
            ));
        }
        if self.red_flag.threshold.is_nan() || self.red_flag.threshold <= 0.0 {
            return Err(invalid("red_flag.threshold", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.red_flag.circular_ratio) {
            return Err(invalid("red_flag.circular_ratio", "must be within [0, 1]"));
        }
        Ok(())
    }

    /// Per-round budget: K-derived defaults with explicit overrides.
    pub fn round_budget(&self) -> RoundBudget {
        let defaults = RoundBudget::for_k(self.voting_k);
        RoundBudget {
            max_votes: self.max_votes_per_round.unwrap_or(defaults.max_votes),
            discard_allowance: self.discard_allowance.unwrap_or(defaults.discard_allowance),
        }
    }

    pub fn parallelism(&self) -> usize {
        self.candidate_parallelism.unwrap_or(self.voting_k).max(1)
    }

    /// Permits for in-flight generations across the whole run, at least 1.
    pub fn generation_permits(&self) -> usize {
        self.max_in_flight_generations.max(1)
    }

    /// Sibling subtasks solved at once, at least 1.
    pub fn subtask_concurrency(&self) -> usize {
        self.max_concurrent_subtasks.max(1)
    }
}
