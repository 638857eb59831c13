//! Prediction output: path conventions, assembly, and the lock-protected shard merge.

pub mod assemble;
pub mod lock;
pub mod paths;
pub mod write;

pub use assemble::{assemble, Prediction, PredictionOutput};
pub use lock::ShardLock;
pub use paths::{output_file_name, shard_suffix, OutputPaths};
pub use write::{merge_shards, try_merge, write_file, write_predictions, write_shard, MergeOutcome};
