//! Crash-safe prediction writes and the shard merge.
//!
//! Every file is written to a hidden temporary sibling, synced, then renamed into place,
//! so the presence of an output file always means its content is complete.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use super::assemble::Prediction;
use super::lock::ShardLock;
use super::paths::OutputPaths;
use crate::error::Result;

/// Result of checking whether the shard set is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// This call concatenated all shard files into the canonical output.
    Merged { shards: usize },
    /// Some shards have not written their output yet.
    Incomplete { found: usize, expected: usize },
    /// The canonical output already exists.
    AlreadyMerged,
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("predictions");
    path.with_file_name(format!(".{}.tmp.{}", name, Uuid::new_v4()))
}

/// Write via a temporary file and rename it over `path`.
fn atomic_write<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path(path);
    let result = (|| -> Result<()> {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(&file);
        fill(&mut writer)?;
        writer.flush()?;
        drop(writer);
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Atomically replace `path` with `contents`.
pub fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    atomic_write(path, |out| {
        out.write_all(contents)?;
        Ok(())
    })
}

/// Write predictions as JSON lines, in order.
pub fn write_predictions(path: &Path, predictions: &[Prediction]) -> Result<()> {
    atomic_write(path, |out| {
        for prediction in predictions {
            serde_json::to_writer(&mut *out, prediction)?;
            out.write_all(b"\n")?;
        }
        Ok(())
    })
}

/// Concatenate the shard files into the canonical output if every shard has finished.
///
/// Takes the lock guard to make the locking requirement explicit.
pub fn merge_shards(
    paths: &OutputPaths,
    expected: usize,
    _lock: &ShardLock,
) -> Result<MergeOutcome> {
    if paths.canonical.exists() {
        return Ok(MergeOutcome::AlreadyMerged);
    }
    let shard_files = paths.existing_shard_files()?;
    if shard_files.len() != expected {
        return Ok(MergeOutcome::Incomplete {
            found: shard_files.len(),
            expected,
        });
    }

    atomic_write(&paths.canonical, |out| {
        for shard_file in &shard_files {
            let mut input = File::open(shard_file)?;
            std::io::copy(&mut input, out)?;
        }
        Ok(())
    })?;

    log::info!(
        "Merged {} shard files into {}",
        shard_files.len(),
        paths.canonical.display()
    );
    Ok(MergeOutcome::Merged {
        shards: shard_files.len(),
    })
}

/// Write this shard's predictions and merge if the set is now complete, all under the
/// dataset lock.
pub fn write_shard(
    paths: &OutputPaths,
    expected: usize,
    predictions: &[Prediction],
) -> Result<MergeOutcome> {
    let lock = ShardLock::acquire(&paths.lock)?;
    write_predictions(paths.target(), predictions)?;
    merge_shards(paths, expected, &lock)
}

/// Merge attempt for a shard whose own output already exists.
pub fn try_merge(paths: &OutputPaths, expected: usize) -> Result<MergeOutcome> {
    let lock = ShardLock::acquire(&paths.lock)?;
    merge_shards(paths, expected, &lock)
}
