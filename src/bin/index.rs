use anyhow::{Context, Result};
use clap::Parser;
use reteval::db::Db;
use reteval::retrievers::bm25::{build_index, clear_index, ensure_schema, passage_count};
use reteval::Config;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "index")]
#[command(about = "Build the BM25 index from a knowledge source JSONL file")]
struct Args {
    /// Knowledge source (overrides retrievers.bm25.knowledge_source)
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Drop existing pages before indexing
    #[arg(short, long)]
    rebuild: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("RUST_LOG", "info")
    ).init();

    let args = Args::parse();

    let config = Config::load()?;
    let bm25 = config
        .retrievers
        .bm25
        .as_ref()
        .context("config has no [retrievers.bm25] section")?;
    let source = args
        .source
        .or_else(|| bm25.knowledge_source.clone())
        .context("no knowledge source: pass --source or set retrievers.bm25.knowledge_source")?;

    log::info!("Index path: {}", bm25.index_path.display());
    log::info!("Knowledge source: {}", source.display());

    let db = Db::new(&bm25.index_path);
    ensure_schema(&db).await?;

    let existing = passage_count(&db).await?;
    if existing > 0 {
        if !args.rebuild {
            log::warn!(
                "Index already holds {} pages. Run with --rebuild to re-index.",
                existing
            );
            return Ok(());
        }
        let removed = clear_index(&db).await?;
        log::info!("Removed {} pages", removed);
    }

    let start = Instant::now();
    let count = build_index(&db, &source)
        .await
        .with_context(|| format!("Failed to index {}", source.display()))?;

    log::info!("Indexing complete: {} pages in {:.2?}", count, start.elapsed());
    Ok(())
}
