use regex::Regex;
use std::path::{Path, PathBuf};

use crate::error::{EvalError, Result};
use crate::planner::ShardSpec;

/// `<output_folder>/<basename of dataset_file><suffix>`
pub fn output_file_name(
    output_folder: &Path,
    dataset_file: &Path,
    suffix: &str,
) -> Result<PathBuf> {
    let basename = dataset_file.file_name().ok_or_else(|| {
        EvalError::InvalidInput(format!(
            "dataset file has no file name: {}",
            dataset_file.display()
        ))
    })?;
    let mut name = basename.to_os_string();
    name.push(suffix);
    Ok(output_folder.join(name))
}

/// Suffix naming one shard's output, e.g. `.03-12`.
///
/// The shard id is zero-padded to the width of `num_shards` so lexicographic filename
/// order equals shard order.
pub fn shard_suffix(shard: &ShardSpec) -> String {
    let width = shard.num_shards.to_string().len();
    format!(".{:0width$}-{}", shard.shard_id, shard.num_shards, width = width)
}

/// Every on-disk location a dataset pass reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Final prediction file; its existence marks the dataset as done.
    pub canonical: PathBuf,
    /// This process's shard output (sharded runs only).
    pub shard: Option<PathBuf>,
    /// Lock guarding shard writes and the merge.
    pub lock: PathBuf,
    num_shards: usize,
}

impl OutputPaths {
    pub fn new(
        output_folder: &Path,
        dataset_file: &Path,
        output_suffix: &str,
        shard: &ShardSpec,
    ) -> Result<Self> {
        let canonical = output_file_name(output_folder, dataset_file, output_suffix)?;
        let lock = with_suffix(&canonical, ".lock");
        let shard_path = shard
            .is_sharded()
            .then(|| with_suffix(&canonical, &shard_suffix(shard)));
        Ok(Self {
            canonical,
            shard: shard_path,
            lock,
            num_shards: shard.num_shards,
        })
    }

    /// File this process writes its predictions to.
    pub fn target(&self) -> &Path {
        self.shard.as_deref().unwrap_or(&self.canonical)
    }

    pub fn folder(&self) -> &Path {
        self.canonical.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Shard outputs for this shard count currently on disk, in lexicographic order.
    pub fn existing_shard_files(&self) -> Result<Vec<PathBuf>> {
        let Some(name) = self.canonical.file_name().and_then(|n| n.to_str()) else {
            return Ok(Vec::new());
        };
        let pattern = Regex::new(&format!(
            r"^{}\.\d+-{}$",
            regex::escape(name),
            self.num_shards
        ))
        .map_err(|e| EvalError::InvalidInput(e.to_string()))?;

        let folder = self.folder();
        if !folder.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some(file_name) = file_name.to_str() {
                if pattern.is_match(file_name) && entry.path().is_file() {
                    files.push(entry.path());
                }
            }
        }
        files.sort();
        Ok(files)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}
