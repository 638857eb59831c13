pub mod config;
pub mod error;
pub mod db;
pub mod dataset;
pub mod planner;
pub mod retrievers;
pub mod output;
pub mod pipeline;
pub mod runlog;

pub use config::Config;
pub use error::{EvalError, Result};
pub use pipeline::{run, DatasetOutcome, RunSummary};
pub use retrievers::{Backend, Retriever};
pub use runlog::RunLogger;
