use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `prlens` - Resilient AI classification for GitHub pull requests.
#[derive(Parser, Debug)]
#[command(name = "prlens")]
#[command(author = "theonlyhennygod")]
#[command(version = "0.1.0")]
#[command(about = "Classify pull requests through a resilient AI pipeline.", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.prlens/config.toml, created on first run)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level regardless of `log_level`
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify a JSON array of pull-request records
    Classify {
        /// Input file holding the pull-request records
        #[arg(short, long)]
        input: PathBuf,

        /// Step name used for checkpointing and resume
        #[arg(short, long, default_value = "prs")]
        step: String,

        /// Ignore any existing checkpoint for the step
        #[arg(long)]
        force: bool,

        /// Worker pool size (capped by batch.hard_max_concurrency)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Write a flat JSON report to this path
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Show breaker, limiter, cache and memory health
    Health {
        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Inspect or prune batch checkpoints
    Checkpoints {
        #[command(subcommand)]
        checkpoint_command: CheckpointCommands,
    },
}

/// Checkpoint subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointCommands {
    /// List checkpoints, newest last
    List {
        /// Only this step
        #[arg(long)]
        step: Option<String>,
    },
    /// Delete all but the most recent checkpoints
    Prune {
        /// Only this step (default: every step)
        #[arg(long)]
        step: Option<String>,

        /// Checkpoints to keep per step (default: checkpoints.keep)
        #[arg(long)]
        keep: Option<usize>,
    },
}
