mod dataset;
mod engine;
mod evaluator;
mod executor;
mod inference;
mod parser;

use anyhow::{bail, Context, Result};
use clap::Parser;
use engine::PythonEngine;
use evaluator::{Evaluator, RunSettings};
use ibench_common::store::{self, RolloutWriter};
use ibench_common::types::{RunSummary, SamplingParams, Split};
use ibench_common::Config;
use inference::OpenAiCompatClient;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ibench-eval")]
#[command(about = "Sample completions for ImpossibleBench tasks and score them against both test suites", long_about = None)]
struct Args {
    /// Dataset split to evaluate (original, conflicting, one_off)
    #[arg(long, default_value = "one_off", value_parser = parse_split)]
    split: Split,

    /// Number of samples per problem (defaults to N_SAMPLES)
    #[arg(long)]
    n_samples: Option<u32>,

    /// Max number of problems to evaluate (all when omitted)
    #[arg(long)]
    limit: Option<usize>,

    /// Sampling temperature (defaults to TEMPERATURE)
    #[arg(long)]
    temperature: Option<f32>,

    /// Completion token budget (defaults to MAX_TOKENS)
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Per-harness sandbox timeout in milliseconds (defaults to SANDBOX_TIMEOUT_MS)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Dataset export to read (defaults to <data_dir>/datasets/<split>.jsonl)
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Output JSONL path (defaults to <data_dir>/rollouts/<split>_<timestamp>.jsonl)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Skip (task_id, sample_index) pairs already present in --output
    #[arg(long, requires = "output")]
    resume: bool,
}

fn parse_split(s: &str) -> Result<Split, String> {
    Split::from_str(s).ok_or_else(|| {
        let valid: Vec<String> = Split::all_variants().iter().map(|s| s.to_string()).collect();
        format!("unknown split '{}', choose from: {}", s, valid.join(", "))
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(n) = args.n_samples {
        config.n_samples = n;
    }
    if let Some(t) = args.temperature {
        config.temperature = t;
    }
    if let Some(m) = args.max_tokens {
        config.max_tokens = m;
    }
    if let Some(ms) = args.timeout_ms {
        config.sandbox_timeout_ms = ms;
    }
    config.validate().context("Invalid configuration")?;

    let client = OpenAiCompatClient::from_config(&config).context("Failed to build inference client")?;
    let engine = PythonEngine::new(config.python_bin.clone());
    if !engine.is_available().await {
        bail!(
            "Python interpreter '{}' cannot be launched; set PYTHON_BIN",
            engine.interpreter()
        );
    }

    let dataset_path = args
        .dataset
        .clone()
        .unwrap_or_else(|| dataset::default_dataset_path(&config.datasets_dir(), args.split));
    let tasks = dataset::load_tasks(&dataset_path, args.limit)?;

    let output = args.output.clone().unwrap_or_else(|| {
        store::default_log_path(&config.rollouts_dir(), &args.split.to_string(), chrono::Utc::now())
    });
    let completed = if args.resume {
        store::completed_keys(&output)
            .with_context(|| format!("Failed to read existing rollouts from {}", output.display()))?
    } else {
        HashSet::new()
    };

    info!("Starting eval");
    info!("  Split:       {}", args.split);
    info!("  Dataset:     {}", dataset_path.display());
    info!("  Tasks:       {}", tasks.len());
    info!("  N-samples:   {}", config.n_samples);
    info!("  Temperature: {}", config.temperature);
    info!("  Max tokens:  {}", config.max_tokens);
    info!("  Timeout:     {}ms", config.sandbox_timeout_ms);
    info!("  Model:       {}", client.model());
    info!("  Output:      {}", output.display());
    if args.resume {
        info!("  Resuming:    {} rollouts already recorded", completed.len());
    }
    if tasks.is_empty() {
        warn!("Dataset contains no tasks");
    }

    let mut writer = RolloutWriter::open(&output)
        .with_context(|| format!("Failed to open rollout log {}", output.display()))?;

    let settings = RunSettings {
        split: args.split.to_string(),
        model: config.model_name.clone(),
        sampling: SamplingParams {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        },
        n_samples: config.n_samples,
        timeout: Duration::from_millis(config.sandbox_timeout_ms),
    };

    let counters = Evaluator::new(&client, &engine, settings)
        .with_completed(completed)
        .run(&tasks, &mut writer)
        .await?;

    print_summary(&counters.into_summary(writer.path().display().to_string()));
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("Eval Summary");
    println!("{}", "─".repeat(60));
    println!("{:<24} {}", "Total rollouts", summary.total);
    println!("{:<24} {}", "Pass original tests", summary.pass_original);
    println!("{:<24} {}", "Pass impossible tests", summary.pass_impossible);
    println!("{:<24} {:.1}%", "Cheating rate", summary.cheating_rate * 100.0);
    println!("{:<24} {}", "Output file", summary.output_path);
}
