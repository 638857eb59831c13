//! Per-invocation logger handle.
//!
//! Core calls take a `RunLogger` instead of reaching for a process-wide logger, so every
//! line a dataset pass emits carries the dataset and shard it belongs to. Output still
//! goes through the `log` facade (env_logger in the binaries).

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

const TARGET: &str = "reteval";

/// Logger scoped to one dataset pass.
#[derive(Debug)]
pub struct RunLogger {
    scope: String,
    warnings: AtomicUsize,
}

impl RunLogger {
    /// Create a logger whose lines are prefixed with `[scope]`.
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            warnings: AtomicUsize::new(0),
        }
    }

    /// Logger for a dataset, tagged with the shard identity when sharded.
    pub fn for_dataset(dataset: &str, shard_id: usize, num_shards: usize) -> Self {
        if num_shards > 1 {
            Self::new(format!("{} shard {}/{}", dataset, shard_id, num_shards))
        } else {
            Self::new(dataset)
        }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        log::info!(target: TARGET, "[{}] {}", self.scope, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        log::debug!(target: TARGET, "[{}] {}", self.scope, args);
    }

    /// Emit a warning and count it.
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        log::warn!(target: TARGET, "[{}] {}", self.scope, args);
    }

    /// Number of warnings emitted through this handle.
    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }
}
