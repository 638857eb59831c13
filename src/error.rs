use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Reteval
#[derive(Error, Debug)]
pub enum EvalError {
    /// Dataset file missing or unparsable (fatal for the whole run)
    #[error("Load error: {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    /// Two validated datapoints share an id (fatal for the dataset)
    #[error("Duplicate datapoint id {id:?} in dataset {dataset}")]
    DuplicateId { dataset: String, id: String },

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode errors outside dataset loading
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Database-related errors (BM25 index)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Retriever backend errors
    #[error("Retriever error: {0}")]
    Retriever(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl EvalError {
    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        EvalError::Load {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

/// Convenient Result type using EvalError
pub type Result<T> = std::result::Result<T, EvalError>;
