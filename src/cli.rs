//! Command-line interface definitions for the article ingester.
//!
//! All arguments can be provided via command-line flags or environment variables.

use clap::Parser;

/// Command-line arguments for the article ingester.
///
/// # Examples
///
/// ```sh
/// # Ingest a batch of jobs
/// article_ingest -i jobs.json -o ./out
///
/// # With configuration, a persistent store and a manual reload
/// article_ingest -i jobs.json -o ./out -c config.yaml -s ./store.json --force-refresh
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// JSON file holding an array of ingest jobs
    #[arg(short, long, env = "ARTICLE_INGEST_INPUT")]
    pub input: String,

    /// Output directory for normalized article JSON files
    #[arg(short, long, env = "ARTICLE_INGEST_OUTPUT_DIR")]
    pub output_dir: String,

    /// Optional path to config.yaml file
    #[arg(short, long, env = "ARTICLE_INGEST_CONFIG")]
    pub config: Option<String>,

    /// Article store file used for duplicate detection across runs
    #[arg(short, long, env = "ARTICLE_INGEST_STORE", default_value = "article_store.json")]
    pub store: String,

    /// Number of articles processed concurrently
    #[arg(long, env = "ARTICLE_INGEST_CONCURRENCY", default_value_t = 8)]
    pub concurrency: usize,

    /// Bypass duplicate detection for every job (manual reload)
    #[arg(long)]
    pub force_refresh: bool,
}
