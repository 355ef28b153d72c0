//! Runner configuration loaded from TOML files on disk.

use std::io::Write;

use maker_runner::{RunnerConfig, RunnerConfigError};

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn test_engine_table_is_nested() {
    let file = write_config(
        r#"
base_url = "http://cluster:8000/v1"
model = "qwen2.5-14b-instruct"
max_tokens = 512

[retry]
max_retries = 5

[engine]
voting_k = 2
max_decomposition_depth = 4
max_concurrent_subtasks = 2

[engine.red_flag]
threshold = 1.5
"#,
    );

    let config = RunnerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.base_url, "http://cluster:8000/v1");
    assert_eq!(config.max_tokens, 512);
    assert_eq!(config.request_timeout_secs, 120);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.initial_backoff_ms, 500);
    assert_eq!(config.engine.voting_k, 2);
    assert_eq!(config.engine.max_decomposition_depth, 4);
    assert_eq!(config.engine.max_concurrent_subtasks, 2);
    assert_eq!(config.engine.red_flag.threshold, 1.5);
    assert!(config.engine.enable_red_flagging);
    config.validate().unwrap();
}

#[test]
fn test_empty_file_is_all_defaults() {
    let file = write_config("");
    let config = RunnerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.engine.voting_k, 3);
    assert_eq!(config.engine.max_decomposition_depth, 10);
    assert!(config.api_key.is_none());
}

#[test]
fn test_invalid_engine_values_rejected() {
    let file = write_config("[engine]\nvoting_k = 0\n");
    let config = RunnerConfig::from_file(file.path()).unwrap();
    assert!(matches!(
        config.validate(),
        Err(RunnerConfigError::Engine(_))
    ));
}

#[test]
fn test_malformed_toml() {
    let file = write_config("base_url = [unclosed");
    assert!(matches!(
        RunnerConfig::from_file(file.path()),
        Err(RunnerConfigError::Parse(_))
    ));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = RunnerConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, RunnerConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}
