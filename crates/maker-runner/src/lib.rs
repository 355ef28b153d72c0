//! Runner for the MAKER engine: an OpenAI-compatible generation client and
//! the layered configuration the `maker-runner` binary uses.

pub mod client;
pub mod config;

pub use client::OpenAiChatGenerator;
pub use config::{RunnerConfig, RunnerConfigError};
