mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ibench_common::Config;

#[derive(Parser)]
#[command(name = "ibench-cli")]
#[command(about = "ImpossibleBench CLI - Inspect, summarize and export rollout logs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a rollout log into SFT chat JSONL
    Export {
        /// Input rollout JSONL file
        #[arg(short, long)]
        input: String,

        /// Output SFT JSONL file
        #[arg(short, long)]
        output: String,
    },

    /// List rollout logs, newest first
    List {
        /// Rollouts directory (defaults to <DATA_DIR>/rollouts)
        #[arg(short, long)]
        dir: Option<String>,
    },

    /// Recompute pass counts and cheating rate over a whole log
    Summarize {
        /// Input rollout JSONL file
        #[arg(short, long)]
        input: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Export { input, output } => {
            commands::export(&input, &output).await?;
        }
        Commands::List { dir } => {
            let dir = dir.unwrap_or_else(|| Config::from_env().rollouts_dir().display().to_string());
            commands::list_rollouts(&dir).await?;
        }
        Commands::Summarize { input } => {
            commands::summarize(&input).await?;
        }
    }

    Ok(())
}
