//! BM25 retriever over a SQLite FTS5 index of a knowledge source.
//!
//! The knowledge source is JSONL, one page per line:
//! `{"wikipedia_id": "...", "wikipedia_title": "...", "url": "...", "text": ["para", ...]}`
//! (`text` may also be a single string). Pages are indexed whole; a query returns the
//! top-k pages as provenance with a normalized score.

use async_trait::async_trait;
use rusqlite::params;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{ProvenanceMap, Retriever};
use crate::config::Bm25Config;
use crate::dataset::{Provenance, Query};
use crate::db::Db;
use crate::error::{EvalError, Result};

const SCHEMA: &str = "CREATE VIRTUAL TABLE IF NOT EXISTS passages USING fts5(\
     wikipedia_id UNINDEXED, title, url UNINDEXED, text, tokenize = 'porter unicode61');";

/// Words that add noise to an OR query.
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "by", "from", "as", "is", "are", "was", "were", "be", "been", "being", "have",
    "has", "had", "do", "does", "did", "will", "would", "should", "could", "what",
    "which", "who", "where", "when", "why", "how", "this", "that", "these", "those",
];

#[derive(Debug, Deserialize)]
struct KnowledgeRecord {
    #[serde(default)]
    wikipedia_id: Option<String>,
    #[serde(default)]
    wikipedia_title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    text: PassageText,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PassageText {
    Paragraphs(Vec<String>),
    Single(String),
}

impl Default for PassageText {
    fn default() -> Self {
        PassageText::Single(String::new())
    }
}

impl PassageText {
    fn joined(self) -> String {
        match self {
            PassageText::Paragraphs(p) => p.join(" "),
            PassageText::Single(s) => s,
        }
    }
}

/// Turn free text into an FTS5 MATCH expression.
///
/// Splits on anything that is not alphanumeric, drops stop words and one-letter terms,
/// de-duplicates, and ORs the remaining terms as quoted strings so punctuation can never
/// reach the FTS5 parser. Returns `None` when nothing searchable is left.
pub fn sanitize_fts5_query(query: &str) -> Option<String> {
    let stop_words: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut seen = HashSet::new();
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.chars().count() >= 2 && !stop_words.contains(t.as_str()))
        .filter(|t| seen.insert(t.clone()))
        .map(|t| format!("\"{}\"", t))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

/// Normalize BM25 score from negative range to 0-1 range
///
/// FTS5 bm25() is negative and lower is better; the sigmoid `1 / (1 + e^raw)` maps it so
/// higher is better.
pub fn normalize_bm25_score(raw_score: f64) -> f32 {
    if raw_score.is_nan() || raw_score.is_infinite() {
        return 0.0;
    }
    (1.0 / (1.0 + raw_score.exp())) as f32
}

/// Create the FTS5 table if needed.
pub async fn ensure_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    })
    .await
}

/// Number of indexed pages.
pub async fn passage_count(db: &Db) -> Result<usize> {
    db.with_connection(|conn| {
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM passages", [], |row| row.get(0))?;
        Ok(n as usize)
    })
    .await
}

/// Drop every indexed page. Returns how many were removed.
pub async fn clear_index(db: &Db) -> Result<usize> {
    ensure_schema(db).await?;
    db.with_connection(|conn| Ok(conn.execute("DELETE FROM passages", [])?))
        .await
}

/// Index a knowledge source JSONL file. Returns the number of pages added.
pub async fn build_index(db: &Db, source: &Path) -> Result<usize> {
    ensure_schema(db).await?;
    let source = source.to_path_buf();
    let start = std::time::Instant::now();

    let count = db
        .with_connection(move |conn| {
            let file = File::open(&source).map_err(|e| EvalError::load(&source, e))?;
            let tx = conn.transaction()?;
            let mut count = 0;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO passages (wikipedia_id, title, url, text) VALUES (?1, ?2, ?3, ?4)",
                )?;
                for (line_num, line) in BufReader::new(file).lines().enumerate() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let record: KnowledgeRecord = serde_json::from_str(&line).map_err(|e| {
                        EvalError::load(&source, format!("line {}: {}", line_num + 1, e))
                    })?;
                    stmt.execute(params![
                        record.wikipedia_id,
                        record.wikipedia_title,
                        record.url,
                        record.text.joined(),
                    ])?;
                    count += 1;
                }
            }
            tx.commit()?;
            Ok(count)
        })
        .await?;

    log::info!("Indexed {} pages in {:?}", count, start.elapsed());
    Ok(count)
}

/// Run every query against the index, keeping the top `k` pages per query.
///
/// Queries with no searchable terms get an empty provenance list.
pub async fn search_bm25(db: &Db, queries: Vec<Query>, k: usize) -> Result<ProvenanceMap> {
    db.with_connection(move |conn| {
        let mut stmt = conn.prepare(
            r#"
            SELECT wikipedia_id, title, url, bm25(passages) AS raw_score
            FROM passages
            WHERE passages MATCH ?1
            ORDER BY raw_score, rowid
            LIMIT ?2
            "#,
        )?;

        let mut results = ProvenanceMap::with_capacity(queries.len());
        for query in queries {
            let mut provenance = Vec::new();
            if let Some(expr) = sanitize_fts5_query(&query.query) {
                let mut rows = stmt.query(params![expr, k as i64])?;
                while let Some(row) = rows.next()? {
                    let raw_score: f64 = row.get(3)?;
                    let mut extra = Map::new();
                    extra.insert(
                        "score".to_string(),
                        Value::from(f64::from(normalize_bm25_score(raw_score))),
                    );
                    provenance.push(Provenance {
                        wikipedia_id: row.get(0)?,
                        title: row.get(1)?,
                        url: row.get(2)?,
                        extra,
                    });
                }
            }
            results.insert(query.id, provenance);
        }
        Ok(results)
    })
    .await
}

fn load_queries(path: &Path) -> Result<Vec<Query>> {
    let file = File::open(path).map_err(|e| EvalError::load(path, e))?;
    let mut queries = Vec::new();
    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let query: Query = serde_json::from_str(&line)
            .map_err(|e| EvalError::load(path, format!("line {}: {}", line_num + 1, e)))?;
        queries.push(query);
    }
    Ok(queries)
}

/// BM25 backend (pull convention).
pub struct Bm25Retriever {
    db: Db,
    config: Bm25Config,
    own_queries: Option<Vec<Query>>,
    queries: Vec<Query>,
}

impl Bm25Retriever {
    /// Open the index, building it from the knowledge source when it is empty.
    pub async fn open(config: Bm25Config) -> Result<Self> {
        let db = Db::new(&config.index_path);
        ensure_schema(&db).await?;

        let indexed = passage_count(&db).await?;
        if indexed == 0 {
            let source = config.knowledge_source.as_ref().ok_or_else(|| {
                EvalError::Config(format!(
                    "BM25 index {} is empty and no knowledge_source is configured",
                    config.index_path.display()
                ))
            })?;
            build_index(&db, source).await?;
        } else {
            log::info!("Using BM25 index {} ({} pages)", config.index_path.display(), indexed);
        }

        let own_queries = config.queries_file.as_deref().map(load_queries).transpose()?;

        Ok(Self {
            db,
            config,
            own_queries,
            queries: Vec::new(),
        })
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn name(&self) -> &str {
        "bm25"
    }

    fn get_queries_data(&self) -> Option<Vec<Query>> {
        self.own_queries.clone()
    }

    fn feed_data(&mut self, queries: Vec<Query>) {
        self.queries = queries;
    }

    async fn run(&mut self) -> Result<ProvenanceMap> {
        let start = std::time::Instant::now();
        let results = search_bm25(&self.db, self.queries.clone(), self.config.top_k).await?;
        log::debug!("BM25 retrieval took {:?} for {} queries", start.elapsed(), results.len());
        Ok(results)
    }

    fn config_snapshot(&self) -> Result<String> {
        serde_yaml_ng::to_string(&self.config).map_err(|e| EvalError::Config(e.to_string()))
    }
}
