//! Replay retriever: serves provenance recorded in an existing prediction file.
//!
//! Useful to re-assemble predictions (e.g. with a different shard count) or to evaluate
//! dumps produced by a retrieval service outside this process.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};

use super::{CallingConvention, ProvenanceMap, Retriever};
use crate::config::ReplayConfig;
use crate::dataset::{Provenance, Query};
use crate::error::{EvalError, Result};

#[derive(Debug, Deserialize)]
struct RecordedPrediction {
    id: String,
    #[serde(default)]
    output: Vec<Value>,
}

impl RecordedPrediction {
    /// Provenance of the first output entry that carries any.
    fn provenance(self) -> Option<serde_json::Result<Vec<Provenance>>> {
        self.output
            .into_iter()
            .find_map(|mut entry| entry.get_mut("provenance").map(Value::take))
            .map(serde_json::from_value)
    }
}

/// Replay backend (push convention).
pub struct ReplayRetriever {
    config: ReplayConfig,
    recorded: HashMap<String, Vec<Provenance>>,
    queries: Vec<Query>,
}

impl ReplayRetriever {
    pub fn open(config: ReplayConfig) -> Result<Self> {
        let path = &config.predictions_file;
        let file = File::open(path).map_err(|e| EvalError::load(path, e))?;

        let mut recorded = HashMap::new();
        for (line_num, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let prediction: RecordedPrediction = serde_json::from_str(&line)
                .map_err(|e| EvalError::load(path, format!("line {}: {}", line_num + 1, e)))?;
            let id = prediction.id.clone();
            match prediction.provenance() {
                Some(Ok(provenance)) => {
                    recorded.insert(id, provenance);
                }
                Some(Err(e)) => {
                    return Err(EvalError::load(path, format!("line {}: {}", line_num + 1, e)));
                }
                None => log::debug!("replay: {} has no provenance, skipped", id),
            }
        }

        log::info!(
            "Loaded {} recorded predictions from {}",
            recorded.len(),
            path.display()
        );
        Ok(Self {
            config,
            recorded,
            queries: Vec::new(),
        })
    }
}

#[async_trait]
impl Retriever for ReplayRetriever {
    fn name(&self) -> &str {
        "replay"
    }

    fn calling_convention(&self) -> CallingConvention {
        CallingConvention::Push
    }

    fn feed_data(&mut self, queries: Vec<Query>) {
        self.queries = queries;
    }

    async fn run(&mut self) -> Result<ProvenanceMap> {
        Ok(self
            .queries
            .iter()
            .filter_map(|q| self.recorded.get(&q.id).map(|p| (q.id.clone(), p.clone())))
            .collect())
    }

    fn config_snapshot(&self) -> Result<String> {
        serde_yaml_ng::to_string(&self.config).map_err(|e| EvalError::Config(e.to_string()))
    }
}
