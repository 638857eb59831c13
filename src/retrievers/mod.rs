//! Retriever boundary: the capability the pipeline consumes, plus the closed set of
//! backends a configuration can select.

pub mod bm25;
pub mod replay;

pub use bm25::Bm25Retriever;
pub use replay::ReplayRetriever;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::config::Config;
use crate::dataset::{Provenance, Query};
use crate::error::{EvalError, Result};

/// Retrieved provenance keyed by query id.
pub type ProvenanceMap = HashMap<String, Vec<Provenance>>;

/// How a backend expects to receive its queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// The backend may own its query list (`get_queries_data`); the pipeline only
    /// supplies one through `set_queries_data`.
    Pull,
    /// The pipeline always supplies queries through `feed_data`.
    Push,
}

/// A retrieval backend.
///
/// `run` is one blocking unit of work: it returns every prediction it has, or fails.
#[async_trait]
pub trait Retriever: Send {
    fn name(&self) -> &str;

    fn calling_convention(&self) -> CallingConvention {
        CallingConvention::Pull
    }

    /// Queries the backend built itself, if it owns its query representation.
    fn get_queries_data(&self) -> Option<Vec<Query>> {
        None
    }

    fn set_queries_data(&mut self, queries: Vec<Query>) {
        self.feed_data(queries);
    }

    fn feed_data(&mut self, queries: Vec<Query>);

    async fn run(&mut self) -> Result<ProvenanceMap>;

    /// YAML rendering of the backend configuration for the run record.
    fn config_snapshot(&self) -> Result<String> {
        Ok(String::new())
    }
}

/// Hand the planned queries to `retriever` according to its calling convention.
///
/// A pull backend that supplied its own list is only re-fed when planning narrowed that
/// list (debug truncation or sharding). Returns whether queries were handed over.
pub fn submit_queries<R: Retriever + ?Sized>(
    retriever: &mut R,
    queries: &[Query],
    backend_queries: bool,
    narrowed: bool,
) -> bool {
    match retriever.calling_convention() {
        CallingConvention::Push => {
            retriever.feed_data(queries.to_vec());
            true
        }
        CallingConvention::Pull if !backend_queries || narrowed => {
            retriever.set_queries_data(queries.to_vec());
            true
        }
        CallingConvention::Pull => false,
    }
}

/// Configured retrieval backend.
pub enum Backend {
    Bm25(Bm25Retriever),
    Replay(ReplayRetriever),
}

impl Backend {
    /// Keys accepted by `run.retriever`.
    pub const NAMES: &'static [&'static str] = &["bm25", "replay"];

    /// Instantiate the backend named by `run.retriever`.
    pub async fn from_config(config: &Config) -> Result<Self> {
        match config.run.retriever.as_str() {
            "bm25" => {
                let bm25 = config.retrievers.bm25.clone().ok_or_else(|| {
                    EvalError::Config("missing [retrievers.bm25] section".to_string())
                })?;
                Ok(Backend::Bm25(Bm25Retriever::open(bm25).await?))
            }
            "replay" => {
                let replay = config.retrievers.replay.clone().ok_or_else(|| {
                    EvalError::Config("missing [retrievers.replay] section".to_string())
                })?;
                Ok(Backend::Replay(ReplayRetriever::open(replay)?))
            }
            other => Err(EvalError::Config(format!("unknown retriever model '{}'", other))),
        }
    }

    fn inner(&self) -> &dyn Retriever {
        match self {
            Backend::Bm25(r) => r,
            Backend::Replay(r) => r,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Retriever {
        match self {
            Backend::Bm25(r) => r,
            Backend::Replay(r) => r,
        }
    }
}

#[async_trait]
impl Retriever for Backend {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn calling_convention(&self) -> CallingConvention {
        self.inner().calling_convention()
    }

    fn get_queries_data(&self) -> Option<Vec<Query>> {
        self.inner().get_queries_data()
    }

    fn set_queries_data(&mut self, queries: Vec<Query>) {
        self.inner_mut().set_queries_data(queries);
    }

    fn feed_data(&mut self, queries: Vec<Query>) {
        self.inner_mut().feed_data(queries);
    }

    async fn run(&mut self) -> Result<ProvenanceMap> {
        self.inner_mut().run().await
    }

    fn config_snapshot(&self) -> Result<String> {
        self.inner().config_snapshot()
    }
}
