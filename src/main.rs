//! # Article Ingest
//!
//! Command-line driver for the article aggregation pipeline.
//!
//! ## Usage
//!
//! ```sh
//! article_ingest -i jobs.json -o ./out -c config.yaml
//! ```
//!
//! ## Flow
//!
//! 1. **Setup**: load config, open the article store, prepare the browser
//! 2. **Aggregation**: run every job through the pipeline (parallel, `--concurrency` at a time)
//! 3. **Output**: write stored articles and a run report, persist the store

use article_ingest::aggregate::Aggregator;
use article_ingest::cli::Cli;
use article_ingest::config::PipelineConfig;
use article_ingest::dedup::MemoryStore;
use article_ingest::fetcher::browser::ChromiumRenderer;
use article_ingest::media::icons::RedditIconLookup;
use article_ingest::models::{AggregationOutcome, IngestJob};
use article_ingest::outputs::json::{self, RunReport};
use article_ingest::utils::ensure_writable_dir;
use chrono::Utc;
use clap::Parser;
use futures::stream::{self, StreamExt};
use std::error::Error;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    let started_at = Utc::now();
    info!("article_ingest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir,
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    // ---- Load config & jobs ----
    let config = match args.config.as_deref() {
        Some(path) => PipelineConfig::load(path)?,
        None => {
            info!("No config file given; using defaults");
            PipelineConfig::default()
        }
    };

    let raw_jobs = tokio::fs::read_to_string(&args.input).await?;
    let mut jobs: Vec<IngestJob> = serde_json::from_str(&raw_jobs)?;
    if args.force_refresh {
        for job in &mut jobs {
            job.feed.force_refresh = true;
        }
    }
    info!(count = jobs.len(), path = %args.input, "Loaded ingest jobs");

    // ---- Pipeline ----
    let store = Arc::new(MemoryStore::load(&args.store).await?);
    info!(articles = store.len(), path = %args.store, "Opened article store");

    let renderer = Arc::new(ChromiumRenderer::new(&config.fetch));
    let icons = RedditIconLookup::new(&config.media.icon_lookup_base, &config.images, &config.fetch)?;
    let aggregator = Aggregator::new(config, Arc::clone(&renderer), Arc::clone(&store), icons)?;

    let concurrency = args.concurrency.max(1);
    info!(concurrency, "Starting parallel aggregation");

    let outcomes: Vec<AggregationOutcome> = stream::iter(jobs.iter())
        .map(|job| aggregator.aggregate(job))
        .buffer_unordered(concurrency)
        .collect()
        .await;

    renderer.shutdown().await;

    // ---- Output ----
    let mut report = RunReport::new(started_at);
    for outcome in &outcomes {
        let path = match outcome {
            AggregationOutcome::Stored { article } => {
                match json::write_article(article, &args.output_dir).await {
                    Ok(path) => Some(path),
                    Err(e) => {
                        error!(url = %article.source_url, error = %e, "Failed to write article JSON");
                        None
                    }
                }
            }
            _ => None,
        };
        report.push(outcome, path.as_deref());
    }
    report.finished_at = Utc::now();

    if let Err(e) = json::write_report(&report, &args.output_dir).await {
        error!(error = %e, "Failed to write run report");
    }

    if let Err(e) = store.save(&args.store).await {
        warn!(path = %args.store, error = %e, "Failed to persist article store");
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        total = report.total(),
        stored = report.stored,
        skipped = report.skipped,
        failed = report.failed,
        "Execution complete"
    );

    Ok(())
}
