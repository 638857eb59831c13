use anyhow::{Context, Result};
use clap::Parser;
use reteval::pipeline::{self, DatasetOutcome};
use reteval::output::MergeOutcome;
use reteval::{Backend, Config};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "reteval")]
#[command(about = "Run a retriever over KILT-style datasets and write per-query provenance predictions")]
struct Args {
    /// Config file (defaults to $RETEVAL_CONFIG, then ./config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Retriever backend key
    #[arg(long)]
    retriever: Option<String>,

    /// Comma-separated dataset keys to evaluate
    #[arg(long, value_delimiter = ',')]
    datasets: Option<Vec<String>>,

    #[arg(long)]
    output_folder: Option<PathBuf>,

    /// Total number of shard processes
    #[arg(long)]
    num_shards: Option<usize>,

    /// This process's shard (0-based)
    #[arg(long)]
    shard_id: Option<usize>,

    /// Only run the first 10 queries of each dataset
    #[arg(long)]
    debug: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(retriever) = self.retriever {
            config.run.retriever = retriever;
        }
        if let Some(datasets) = self.datasets {
            config.run.evaluation_datasets = datasets;
        }
        if let Some(folder) = self.output_folder {
            config.run.output_folder = folder;
        }
        if let Some(n) = self.num_shards {
            config.run.num_shards = n;
        }
        if let Some(id) = self.shard_id {
            config.run.shard_id = id;
        }
        if self.debug {
            config.run.debug = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = Args::parse();

    let mut config = match args.config.take() {
        Some(path) => Config::from_path(&path)?,
        None => Config::load()?,
    };
    args.apply(&mut config);
    config.validate().context("Invalid configuration after command-line overrides")?;

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", config.run.log_level.as_str())
    ).init();

    log::info!("Starting retrieval evaluation");
    log::info!("Retriever: {}", config.run.retriever);
    log::info!("Output folder: {}", config.output_folder().display());
    if config.shard().is_sharded() {
        log::info!("Shard {} of {}", config.run.shard_id, config.run.num_shards);
    }

    let mut backend = Backend::from_config(&config)
        .await
        .context("Failed to initialize retriever")?;

    let summary = pipeline::run(&config, &mut backend).await?;

    for report in &summary.datasets {
        let status = match &report.outcome {
            DatasetOutcome::Skipped { path } => format!("skipped, {} exists", path.display()),
            DatasetOutcome::Written { path, predictions } => {
                format!("{} predictions -> {}", predictions, path.display())
            }
            DatasetOutcome::ShardWritten { path, predictions, merged } => {
                format!(
                    "{} predictions -> {} ({})",
                    predictions,
                    path.display(),
                    merge_status(merged)
                )
            }
            DatasetOutcome::ShardReused { path, merged } => {
                format!("reused {} ({})", path.display(), merge_status(merged))
            }
            DatasetOutcome::NoPredictions => "no predictions returned".to_string(),
        };
        log::info!("{}: {} [{} warnings]", report.key, status, report.warnings);
    }
    log::info!(
        "Done: {} datasets, {} warnings",
        summary.datasets.len(),
        summary.warnings()
    );

    Ok(())
}

fn merge_status(merged: &MergeOutcome) -> String {
    match merged {
        MergeOutcome::Merged { shards } => format!("merged {} shards", shards),
        MergeOutcome::Incomplete { found, expected } => {
            format!("{}/{} shards done, merge pending", found, expected)
        }
        MergeOutcome::AlreadyMerged => "already merged".to_string(),
    }
}
