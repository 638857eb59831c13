//! Per-dataset driver: skip-if-exists, load, plan, retrieve, assemble, write.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::task;

use crate::config::Config;
use crate::dataset::{compute_file_hash, load_data, TaskDataset};
use crate::error::{EvalError, Result};
use crate::output::{
    assemble, try_merge, write_file, write_predictions, write_shard, MergeOutcome, OutputPaths,
};
use crate::planner::{plan, PlanOptions, ShardSpec};
use crate::retrievers::{submit_queries, ProvenanceMap, Retriever};
use crate::runlog::RunLogger;

/// Name of the run record written next to the predictions.
pub const RUN_RECORD_FILE: &str = "retriever_cfg.yaml";

/// Settings shared by every dataset pass of one invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_folder: PathBuf,
    pub output_suffix: String,
    pub transform_override: Option<String>,
    pub debug: bool,
    pub shard: ShardSpec,
}

impl RunOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_folder: config.output_folder().to_path_buf(),
            output_suffix: config.run.output_suffix.clone(),
            transform_override: config.run.question_transform_type.clone(),
            debug: config.run.debug,
            shard: config.shard(),
        }
    }
}

/// What a dataset pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetOutcome {
    /// The canonical output already existed.
    Skipped { path: PathBuf },
    /// Unsharded output written.
    Written { path: PathBuf, predictions: usize },
    /// This shard's file written, followed by a merge attempt.
    ShardWritten {
        path: PathBuf,
        predictions: usize,
        merged: MergeOutcome,
    },
    /// This shard's file survived an earlier run; only the merge was attempted.
    ShardReused { path: PathBuf, merged: MergeOutcome },
    /// Nothing to write: no valid queries in an unsharded run, or the retriever returned
    /// nothing. A rerun retries.
    NoPredictions,
}

#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub key: String,
    pub outcome: DatasetOutcome,
    /// Validation rejections and count mismatches logged during the pass.
    pub warnings: usize,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub datasets: Vec<DatasetReport>,
}

impl RunSummary {
    pub fn warnings(&self) -> usize {
        self.datasets.iter().map(|d| d.warnings).sum()
    }
}

#[derive(Serialize)]
struct RunRecord<'a> {
    retriever: &'a str,
    evaluation_datasets: &'a [String],
    num_shards: usize,
    debug: bool,
    config: serde_yaml_ng::Value,
}

/// Run every configured dataset through `retriever`, in configured order.
///
/// Load and duplicate-id failures abort the run; datasets already processed keep their output.
pub async fn run<R: Retriever + ?Sized>(config: &Config, retriever: &mut R) -> Result<RunSummary> {
    let options = RunOptions::from_config(config);
    write_run_record(config, &*retriever, &options.output_folder)?;

    let mut summary = RunSummary::default();
    for (key, dataset) in config.evaluation_datasets() {
        let report = run_dataset(key, dataset, &mut *retriever, &options).await?;
        summary.datasets.push(report);
    }
    Ok(summary)
}

/// Write the retriever configuration into the output folder unless a previous run did.
fn write_run_record<R: Retriever + ?Sized>(
    config: &Config,
    retriever: &R,
    folder: &Path,
) -> Result<()> {
    let path = folder.join(RUN_RECORD_FILE);
    if path.exists() {
        return Ok(());
    }
    let snapshot = retriever.config_snapshot()?;
    let backend_config = if snapshot.trim().is_empty() {
        serde_yaml_ng::Value::Null
    } else {
        serde_yaml_ng::from_str(&snapshot).map_err(|e| EvalError::Config(e.to_string()))?
    };
    let record = RunRecord {
        retriever: retriever.name(),
        evaluation_datasets: &config.run.evaluation_datasets,
        num_shards: config.run.num_shards,
        debug: config.run.debug,
        config: backend_config,
    };
    let yaml = serde_yaml_ng::to_string(&record).map_err(|e| EvalError::Config(e.to_string()))?;
    write_file(&path, yaml.as_bytes())?;
    log::info!("Wrote run record {}", path.display());
    Ok(())
}

/// Process one dataset.
///
/// # Arguments
/// * `key` - Dataset key, used to tag log lines
/// * `dataset` - Dataset definition (file, task family, default transform)
/// * `retriever` - Backend that answers the queries
/// * `options` - Output location, debug flag and shard identity
pub async fn run_dataset<R: Retriever + ?Sized>(
    key: &str,
    dataset: &TaskDataset,
    retriever: &mut R,
    options: &RunOptions,
) -> Result<DatasetReport> {
    let log = RunLogger::for_dataset(key, options.shard.shard_id, options.shard.num_shards);
    let outcome = process(dataset, &mut *retriever, options, &log).await?;
    Ok(DatasetReport {
        key: key.to_string(),
        outcome,
        warnings: log.warnings(),
    })
}

async fn process<R: Retriever + ?Sized>(
    dataset: &TaskDataset,
    retriever: &mut R,
    options: &RunOptions,
    log: &RunLogger,
) -> Result<DatasetOutcome> {
    let paths = OutputPaths::new(
        &options.output_folder,
        &dataset.file,
        &options.output_suffix,
        &options.shard,
    )?;

    if paths.canonical.exists() {
        log.info(format_args!(
            "output {} exists, skipping",
            paths.canonical.display()
        ));
        return Ok(DatasetOutcome::Skipped {
            path: paths.canonical,
        });
    }

    let num_shards = options.shard.num_shards;
    if let Some(shard_path) = paths.shard.clone().filter(|p| p.exists()) {
        log.info(format_args!(
            "shard output {} exists, skipping retrieval",
            shard_path.display()
        ));
        let merged = blocking({
            let paths = paths.clone();
            move || try_merge(&paths, num_shards)
        })
        .await?;
        log_merge(log, &merged);
        return Ok(DatasetOutcome::ShardReused {
            path: shard_path,
            merged,
        });
    }

    log.info(format_args!(
        "dataset {} ({}) from {}",
        dataset.name,
        dataset.task_family,
        dataset.file.display()
    ));
    let raw_data = load_data(&dataset.file)?;
    log.info(format_args!(
        "loaded {} datapoints, sha256 {}",
        raw_data.len(),
        compute_file_hash(&dataset.file)?
    ));

    let plan_options = PlanOptions {
        transform_override: options.transform_override.as_deref(),
        debug: options.debug,
        shard: options.shard,
    };
    let plan = plan(raw_data, dataset, retriever.get_queries_data(), &plan_options, log)?;
    log.info(format_args!(
        "{} validated datapoints, {} queries, shard range [{}, {}) of {}",
        plan.validated.len(),
        plan.queries.len(),
        plan.range.start,
        plan.range.end,
        plan.total_queries
    ));

    let mut provenance = ProvenanceMap::new();
    if !plan.queries.is_empty() {
        submit_queries(&mut *retriever, &plan.queries, plan.backend_queries, plan.is_narrowed());
        log.info(format_args!("running retriever {}", retriever.name()));
        provenance = retriever.run().await?;
    }

    if provenance.len() != plan.queries.len() {
        log.warn(format_args!(
            "retriever {} returned {} predictions for {} queries",
            retriever.name(),
            provenance.len(),
            plan.queries.len()
        ));
    }

    let predictions = assemble(&plan.validated, &plan.queries, provenance);
    // An empty shard file still counts toward the merge; an empty canonical file would
    // only mark the dataset as done.
    if predictions.is_empty() && (!plan.queries.is_empty() || !options.shard.is_sharded()) {
        log.warn(format_args!("no predictions to write"));
        return Ok(DatasetOutcome::NoPredictions);
    }
    let count = predictions.len();

    if options.shard.is_sharded() {
        let shard_path = paths.target().to_path_buf();
        let merged = blocking({
            let paths = paths.clone();
            move || write_shard(&paths, num_shards, &predictions)
        })
        .await?;
        log.info(format_args!(
            "wrote {} predictions to {}",
            count,
            shard_path.display()
        ));
        log_merge(log, &merged);
        Ok(DatasetOutcome::ShardWritten {
            path: shard_path,
            predictions: count,
            merged,
        })
    } else {
        let path = paths.canonical.clone();
        blocking({
            let path = path.clone();
            move || write_predictions(&path, &predictions)
        })
        .await?;
        log.info(format_args!("wrote {} predictions to {}", count, path.display()));
        Ok(DatasetOutcome::Written {
            path,
            predictions: count,
        })
    }
}

fn log_merge(log: &RunLogger, merged: &MergeOutcome) {
    match merged {
        MergeOutcome::Merged { shards } => log.info(format_args!("merged {} shards", shards)),
        MergeOutcome::Incomplete { found, expected } => log.info(format_args!(
            "{} of {} shards present, merge deferred",
            found, expected
        )),
        MergeOutcome::AlreadyMerged => log.info(format_args!("canonical output already merged")),
    }
}

/// Lock waits and fsyncs run off the async workers.
async fn blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| EvalError::Io(std::io::Error::other(e)))?
}
