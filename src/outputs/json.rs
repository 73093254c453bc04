//! JSON output of normalized articles and per-run reports.
//!
//! # Output Structure
//!
//! Articles are grouped by their publication date:
//! ```text
//! output_dir/
//! ├── 2025-05-06/
//! │   ├── launch-day-at-the-cape.json
//! │   └── markets-close-higher.json
//! └── report.json
//! ```
//!
//! Two articles with the same title on the same day would collide on the slug;
//! the later one gets a numeric suffix instead of overwriting the first.

use crate::models::{AggregationOutcome, NormalizedArticle};
use crate::utils::slugify_title;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::error::Error;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Summary of one ingest run, written as `report.json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<OutcomeEntry>,
}

/// One line of the report; stored articles are listed by URL only.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeEntry {
    Stored { url: String, path: Option<String> },
    Skipped { url: String, reason: String },
    Failed { url: String, reason: String },
}

impl RunReport {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            stored: 0,
            skipped: 0,
            failed: 0,
            outcomes: Vec::new(),
        }
    }

    /// Count an outcome. `path` is where a stored article was written, if it was.
    pub fn push(&mut self, outcome: &AggregationOutcome, path: Option<&Path>) {
        let entry = match outcome {
            AggregationOutcome::Stored { article } => {
                self.stored += 1;
                OutcomeEntry::Stored {
                    url: article.source_url.clone(),
                    path: path.map(|p| p.display().to_string()),
                }
            }
            AggregationOutcome::Skipped { url, reason } => {
                self.skipped += 1;
                OutcomeEntry::Skipped {
                    url: url.clone(),
                    reason: reason.clone(),
                }
            }
            AggregationOutcome::Failed { url, reason } => {
                self.failed += 1;
                OutcomeEntry::Failed {
                    url: url.clone(),
                    reason: reason.clone(),
                }
            }
        };
        self.outcomes.push(entry);
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }
}

/// Write a [`NormalizedArticle`] to `{output_dir}/{date}/{slug}.json`.
///
/// The date is the article's publication date in local time.
///
/// # Arguments
///
/// * `article` - The article to serialize
/// * `output_dir` - Base directory for JSON output
///
/// # Returns
///
/// The path the article was written to, or an error if directory creation or
/// file writing fails.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir, url = %article.source_url))]
pub async fn write_article(
    article: &NormalizedArticle,
    output_dir: &str,
) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(article)?;

    let local_date = article.published_at.with_timezone(&Local).date_naive();
    let date_dir = Path::new(output_dir).join(local_date.to_string());

    if let Err(e) = fs::create_dir_all(&date_dir).await {
        error!(dir = %date_dir.display(), error = %e, "Failed to create JSON dir");
        return Err(e.into());
    }

    let slug = slugify_title(&article.title);
    let mut path = date_dir.join(format!("{slug}.json"));
    let mut n = 2;
    while fs::try_exists(&path).await? {
        path = date_dir.join(format!("{slug}-{n}.json"));
        n += 1;
    }

    fs::write(&path, json).await?;
    info!(path = %path.display(), "Wrote article JSON");
    Ok(path)
}

/// Write the run report to `{output_dir}/report.json`, replacing any previous one.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_report(report: &RunReport, output_dir: &str) -> Result<PathBuf, Box<dyn Error>> {
    let json = serde_json::to_string_pretty(report)?;
    fs::create_dir_all(output_dir).await?;
    let path = Path::new(output_dir).join("report.json");
    fs::write(&path, json).await?;
    info!(
        path = %path.display(),
        stored = report.stored,
        skipped = report.skipped,
        failed = report.failed,
        "Wrote run report"
    );
    Ok(path)
}
