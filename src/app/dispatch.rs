use crate::app::status::{render_health, render_outcome};
use crate::cli::commands::{CheckpointCommands, Cli, Commands};
use anyhow::{Context, Result, bail};
use prlens::batch::{BatchOptions, CheckpointStore};
use prlens::classify::{Classifier, OpenAiCompatibleClassifier, PullRequestRecord, WorkItem};
use prlens::config::Config;
use prlens::pipeline::Pipeline;
use prlens::report::BatchReport;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

fn load_records(path: &Path) -> Result<Vec<PullRequestRecord>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse pull-request records in {}", path.display()))
}

fn classifier_for(config: &Config) -> Arc<dyn Classifier> {
    Arc::new(OpenAiCompatibleClassifier::from_config(&config.classifier))
}

async fn run_classify(
    config: &Config,
    input: &Path,
    step: &str,
    force: bool,
    concurrency: Option<usize>,
    report: Option<PathBuf>,
) -> Result<()> {
    if config.needs_api_key() {
        bail!(
            "No API key configured. Set PRLENS_API_KEY or classifier.api_key in {}",
            config.config_path.display()
        );
    }

    let records = load_records(input)?;
    let items: Vec<WorkItem> = records.iter().map(WorkItem::from_pull_request).collect();
    info!(input = %input.display(), items = items.len(), step, "loaded pull requests");

    let pipeline = Pipeline::from_config(config, classifier_for(config));
    let monitor = pipeline.start_monitor();
    let options = BatchOptions {
        max_concurrency: concurrency,
        force,
    };

    let outcome = tokio::select! {
        outcome = pipeline.coordinator.process_batch(step, &items, options) => outcome,
        _ = tokio::signal::ctrl_c() => {
            if let Some(handle) = monitor {
                handle.shutdown().await;
            }
            bail!("interrupted; in-flight classifications were cancelled");
        }
    };

    if let Some(handle) = monitor {
        handle.shutdown().await;
    }
    let outcome = outcome.context("Batch failed")?;

    println!("{}", render_outcome(&outcome));
    if let Some(path) = report {
        BatchReport::from_outcome(&outcome).write_to(&path)?;
        println!("report: {}", path.display());
    }
    Ok(())
}

fn run_checkpoints(config: &Config, command: CheckpointCommands) -> Result<()> {
    let store = CheckpointStore::new(config.checkpoint_dir());
    match command {
        CheckpointCommands::List { step } => {
            let manifest = store.manifest().context("Failed to read checkpoint manifest")?;
            let mut printed = false;
            for (name, history) in &manifest.steps {
                if step.as_deref().is_some_and(|wanted| wanted != name) {
                    continue;
                }
                println!("{name}:");
                for record in history {
                    println!(
                        "  {}  {:>5} results  {}",
                        record.timestamp.to_rfc3339(),
                        record.results_count,
                        record.file
                    );
                }
                printed = true;
            }
            if !printed {
                println!("No checkpoints in {}", store.dir().display());
            }
            Ok(())
        }
        CheckpointCommands::Prune { step, keep } => {
            let keep = keep.unwrap_or(config.checkpoints.keep);
            let removed = match step.as_deref() {
                Some(step) => store.prune(step, keep),
                None => store.prune_all(keep),
            }
            .context("Failed to prune checkpoints")?;
            println!("Removed {removed} checkpoint(s), keeping {keep} per step.");
            Ok(())
        }
    }
}

pub async fn dispatch(cli: Cli, config: Config) -> Result<()> {
    match cli.command {
        Commands::Classify {
            input,
            step,
            force,
            concurrency,
            report,
        } => run_classify(&config, &input, &step, force, concurrency, report).await,

        Commands::Health { json } => {
            let pipeline = Pipeline::from_config(&config, classifier_for(&config));
            if let Some(monitor) = &pipeline.monitor {
                monitor.check_memory_usage();
            }
            let report = pipeline.health().process_local();
            if json {
                println!("{}", serde_json::to_string_pretty(&report.to_json())?);
            } else {
                println!("{}", render_health(&report, &config));
            }
            Ok(())
        }

        Commands::Checkpoints { checkpoint_command } => {
            run_checkpoints(&config, checkpoint_command)
        }
    }
}
