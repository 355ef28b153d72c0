//! Runner configuration: endpoint settings plus an optional `[engine]` table.
//!
//! ```toml
//! base_url = "http://localhost:8080/v1"
//! model = "qwen2.5-14b-instruct"
//! temperature = 0.7
//!
//! [retry]
//! max_retries = 3
//!
//! [engine]
//! voting_k = 2
//! max_decomposition_depth = 6
//! ```
//!
//! Precedence is env > file > defaults for both the runner fields
//! (`MAKER_BASE_URL`, `MAKER_MODEL`, `MAKER_API_KEY`, ...) and the engine
//! table (`MAKER_VOTING_K`, ...).

use std::path::Path;

use maker_engine::{EngineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum RunnerConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Engine(#[from] maker_engine::ConfigError),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// OpenAI-compatible API root, e.g. `http://host:8080/v1`.
    pub base_url: String,
    pub model: String,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
    pub engine: EngineConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model: "local-model".to_string(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 1024,
            request_timeout_secs: 120,
            retry: RetryPolicy::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, RunnerConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, RunnerConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| RunnerConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// File (if any) → env overrides → validation.
    pub fn load(path: Option<&Path>) -> Result<Self, RunnerConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
        self.engine.apply_env_overrides();
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("MAKER_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = lookup("MAKER_MODEL") {
            self.model = model;
        }
        if let Some(key) = lookup("MAKER_API_KEY") {
            self.api_key = (!key.trim().is_empty()).then_some(key);
        }
        if let Some(val) = lookup("MAKER_TEMPERATURE") {
            if let Ok(t) = val.trim().parse() {
                self.temperature = t;
            }
        }
        if let Some(val) = lookup("MAKER_MAX_TOKENS") {
            if let Ok(n) = val.trim().parse() {
                self.max_tokens = n;
            }
        }
        if let Some(val) = lookup("MAKER_REQUEST_TIMEOUT_SECS") {
            if let Ok(n) = val.trim().parse() {
                self.request_timeout_secs = n;
            }
        }
    }

    pub fn validate(&self) -> Result<(), RunnerConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(RunnerConfigError::Invalid {
                field: "base_url",
                reason: "must not be empty".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(RunnerConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(RunnerConfigError::Invalid {
                field: "temperature",
                reason: "must be within [0, 2]".into(),
            });
        }
        self.engine.validate()?;
        Ok(())
    }
}
