use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dataset::TaskDataset;
use crate::planner::ShardSpec;
use crate::retrievers::Backend;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub run: RunConfig,
    /// Dataset definitions keyed by the names `run.evaluation_datasets` refers to.
    #[serde(default)]
    pub datasets: BTreeMap<String, TaskDataset>,
    #[serde(default)]
    pub retrievers: RetrieversConfig,
}

/// What to run and where to put the predictions
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Retriever backend key (`bm25` or `replay`).
    pub retriever: String,
    pub evaluation_datasets: Vec<String>,
    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,
    #[serde(default)]
    pub output_suffix: String,
    /// Overrides every dataset's own question transform when set.
    #[serde(default)]
    pub question_transform_type: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_num_shards")]
    pub num_shards: usize,
    #[serde(default)]
    pub shard_id: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Per-backend settings; only the selected backend's section is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrieversConfig {
    #[serde(default)]
    pub bm25: Option<Bm25Config>,
    #[serde(default)]
    pub replay: Option<ReplayConfig>,
}

/// BM25 (SQLite FTS5) backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bm25Config {
    pub index_path: PathBuf,
    /// Knowledge source JSONL used to build the index when it is empty.
    #[serde(default)]
    pub knowledge_source: Option<PathBuf>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Backend-owned query list (`{"id", "query"}` per line) used instead of dataset inputs.
    #[serde(default)]
    pub queries_file: Option<PathBuf>,
}

/// Replay backend: serve provenance from an existing prediction file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    pub predictions_file: PathBuf,
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("./predictions")
}

fn default_num_shards() -> usize {
    1
}

fn default_top_k() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in RETEVAL_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // Optional; missing .env is fine
        let _ = dotenv::dotenv();

        let config_path = std::env::var("RETEVAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_path(&config_path)
    }

    /// Load and validate a specific config file
    pub fn from_path(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        ShardSpec::new(self.run.num_shards, self.run.shard_id)?;

        if self.run.evaluation_datasets.is_empty() {
            anyhow::bail!("run.evaluation_datasets must name at least one dataset");
        }

        for key in &self.run.evaluation_datasets {
            if !self.datasets.contains_key(key) {
                anyhow::bail!(
                    "run.evaluation_datasets references undefined dataset '{}'. Add a [datasets.{}] section.",
                    key,
                    key
                );
            }
        }

        match self.run.retriever.as_str() {
            "bm25" => {
                let bm25 = self
                    .retrievers
                    .bm25
                    .as_ref()
                    .context("retriever = \"bm25\" requires a [retrievers.bm25] section")?;
                if bm25.top_k == 0 {
                    anyhow::bail!("retrievers.bm25.top_k must be greater than 0");
                }
            }
            "replay" => {
                self.retrievers
                    .replay
                    .as_ref()
                    .context("retriever = \"replay\" requires a [retrievers.replay] section")?;
            }
            other => anyhow::bail!(
                "unknown retriever '{}' (expected one of: {})",
                other,
                Backend::NAMES.join(", ")
            ),
        }

        Ok(())
    }

    pub fn shard(&self) -> ShardSpec {
        ShardSpec {
            num_shards: self.run.num_shards,
            shard_id: self.run.shard_id,
        }
    }

    /// Datasets to evaluate, in configured order
    pub fn evaluation_datasets(&self) -> Vec<(&str, &TaskDataset)> {
        self.run
            .evaluation_datasets
            .iter()
            .filter_map(|key| self.datasets.get(key).map(|d| (key.as_str(), d)))
            .collect()
    }

    pub fn output_folder(&self) -> &Path {
        &self.run.output_folder
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::TaskFamily;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Serialize config tests that mutate process-wide env so they don't race.
    static CONFIG_TEST_LOCK: Mutex<()> = Mutex::new(());

    const TEST_CONFIG: &str = r#"
[run]
retriever = "bm25"
evaluation_datasets = ["nq-dev", "wafer-dev"]
output_folder = "out"
num_shards = 4
shard_id = 3
log_level = "debug"

[datasets.nq-dev]
file = "data/nq-dev-kilt.jsonl"
task_family = "wikipedia"
name = "Natural Questions"

[datasets.wafer-dev]
file = "data/wafer-dev.jsonl"
task_family = "wafer_ccnet"
name = "WAFER"
question_transform_type = "sentence_1"

[retrievers.bm25]
index_path = "bm25.db"
knowledge_source = "kilt_knowledgesource.jsonl"
"#;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_config_from_path() {
        let dir = TempDir::new().unwrap();
        let config = Config::from_path(&write_config(&dir, TEST_CONFIG)).unwrap();
        assert_eq!(config.run.log_level, "debug");
        assert_eq!(config.shard(), ShardSpec::new(4, 3).unwrap());
        assert_eq!(config.retrievers.bm25.as_ref().unwrap().top_k, 100);
        assert_eq!(config.run.output_suffix, "");
        assert!(!config.run.debug);

        let datasets = config.evaluation_datasets();
        assert_eq!(datasets.len(), 2);
        assert_eq!(datasets[0].0, "nq-dev");
        assert_eq!(datasets[1].1.task_family, TaskFamily::WaferCcnet);
        assert_eq!(datasets[1].1.question_transform_type.as_deref(), Some("sentence_1"));
    }

    #[test]
    fn test_config_load_uses_env_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, TEST_CONFIG);
        let original = std::env::var("RETEVAL_CONFIG").ok();
        std::env::set_var("RETEVAL_CONFIG", &path);
        let config = Config::load();
        std::env::remove_var("RETEVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("RETEVAL_CONFIG", v);
        }
        assert!(config.is_ok(), "Config::load() failed: {:?}", config.err());
    }

    #[test]
    fn test_config_invalid_path() {
        let _lock = CONFIG_TEST_LOCK.lock().unwrap();
        let original = std::env::var("RETEVAL_CONFIG").ok();
        std::env::set_var("RETEVAL_CONFIG", "nonexistent.toml");
        let config = Config::load();
        assert!(config.is_err());
        std::env::remove_var("RETEVAL_CONFIG");
        if let Some(v) = original {
            std::env::set_var("RETEVAL_CONFIG", v);
        }
    }

    #[test]
    fn test_config_rejects_bad_shard() {
        let dir = TempDir::new().unwrap();
        let content = TEST_CONFIG.replace("shard_id = 3", "shard_id = 4");
        let err = Config::from_path(&write_config(&dir, &content)).unwrap_err();
        assert!(err.to_string().contains("shard_id"));
    }

    #[test]
    fn test_config_rejects_undefined_dataset() {
        let dir = TempDir::new().unwrap();
        let content = TEST_CONFIG.replace(r#"["nq-dev", "wafer-dev"]"#, r#"["nq-dev", "trex"]"#);
        let err = Config::from_path(&write_config(&dir, &content)).unwrap_err();
        assert!(err.to_string().contains("trex"));
    }

    #[test]
    fn test_config_rejects_unknown_retriever() {
        let dir = TempDir::new().unwrap();
        let content = TEST_CONFIG.replace(r#"retriever = "bm25""#, r#"retriever = "dpr""#);
        let err = Config::from_path(&write_config(&dir, &content)).unwrap_err();
        assert!(err.to_string().contains("unknown retriever"));
    }

    #[test]
    fn test_config_requires_selected_backend_section() {
        let dir = TempDir::new().unwrap();
        let content = TEST_CONFIG.replace(r#"retriever = "bm25""#, r#"retriever = "replay""#);
        let err = Config::from_path(&write_config(&dir, &content)).unwrap_err();
        assert!(err.to_string().contains("[retrievers.replay]"));
    }
}
