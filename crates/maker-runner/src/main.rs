//! Run one task through the MAKER engine.
//!
//! # Usage
//!
//! ```bash
//! # Against a local OpenAI-compatible server
//! MAKER_BASE_URL=http://localhost:8080/v1 maker-runner "First add 2 and 3, then double it"
//!
//! # Wiring smoke test, no endpoint needed
//! maker-runner --dry-run --json "What is 5 + 7?"
//!
//! # Stricter voting, shallower trees
//! maker-runner --voting-k 4 --max-depth 3 --task-file task.txt
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use maker_engine::prompts::DECOMPOSE_MARKER;
use maker_engine::{Orchestrator, RetryingGenerator, RunReport, ScriptedGenerator, TextGenerator};
use maker_runner::{OpenAiChatGenerator, RunnerConfig};
use tracing::info;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Task text (or use --task-file)
    task: Option<String>,

    /// Read the task text from a file
    #[arg(long, conflicts_with = "task")]
    task_file: Option<PathBuf>,

    /// TOML config file (runner settings plus an optional [engine] table)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Required vote margin (overrides MAKER_VOTING_K)
    #[arg(long)]
    voting_k: Option<usize>,

    /// Maximum decomposition depth (overrides MAKER_MAX_DECOMPOSITION_DEPTH)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Count every candidate, never discard for uncertainty
    #[arg(long, default_value_t = false)]
    no_red_flags: bool,

    /// Generations in flight per voting round
    #[arg(long)]
    parallelism: Option<usize>,

    /// Print the full run report as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Use a scripted generator that echoes the task instead of an endpoint
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn read_task(args: &Args) -> Result<String> {
    let task = match (&args.task, &args.task_file) {
        (Some(task), _) => task.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading task file {}", path.display()))?,
        (None, None) => bail!("no task given: pass TASK or --task-file"),
    };
    let task = task.trim().to_string();
    if task.is_empty() {
        bail!("task is empty");
    }
    Ok(task)
}

fn load_config(args: &Args) -> Result<RunnerConfig> {
    let mut config =
        RunnerConfig::load(args.config.as_deref()).context("loading runner configuration")?;

    let engine = &mut config.engine;
    if let Some(k) = args.voting_k {
        engine.voting_k = k;
    }
    if let Some(depth) = args.max_depth {
        engine.max_decomposition_depth = depth;
    }
    if args.no_red_flags {
        engine.enable_red_flagging = false;
    }
    if let Some(n) = args.parallelism {
        engine.candidate_parallelism = Some(n);
    }
    engine
        .validate()
        .context("invalid engine settings from command line")?;
    Ok(config)
}

fn build_generator(args: &Args, config: &RunnerConfig, task: &str) -> Result<Arc<dyn TextGenerator>> {
    if args.dry_run {
        // Breakdowns come back empty, so every node degrades to an echo.
        let scripted = ScriptedGenerator::new()
            .with_response(DECOMPOSE_MARKER, "")
            .with_fallback(task);
        return Ok(Arc::new(scripted));
    }

    let client = OpenAiChatGenerator::new(config).context("building HTTP client")?;
    info!(endpoint = %client.endpoint(), model = %config.model, "Using chat completions endpoint");
    Ok(Arc::new(RetryingGenerator::new(client, config.retry.clone())))
}

fn print_human(report: &RunReport) {
    println!("{}", report.summary_line());
    for notice in &report.notices {
        println!("  note: {notice}");
    }
    match (&report.answer, &report.error) {
        (Some(answer), _) => println!("\n{answer}"),
        (None, Some(error)) => println!("\nfailed: {error}"),
        (None, None) => println!("\nfailed"),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let task = read_task(&args)?;
    let config = load_config(&args)?;
    let generator = build_generator(&args, &config, &task)?;

    info!(
        k = config.engine.voting_k,
        max_depth = config.engine.max_decomposition_depth,
        dry_run = args.dry_run,
        "maker-runner starting"
    );

    let orchestrator = Orchestrator::new(generator, config.engine.clone());
    let report = orchestrator.run(&task).await;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serializing run report")?
        );
    } else {
        print_human(&report);
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
