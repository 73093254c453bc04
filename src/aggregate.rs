//! The aggregation orchestrator.
//!
//! One call to [`Aggregator::aggregate`] takes an article through
//! fetch → extract → standardize → sanitize → duplicate check → emit, strictly
//! in that order, and turns the result into an [`AggregationOutcome`]:
//!
//! - success: `Stored`, recorded in the article store
//! - skip-worthy failure (remote rejection, duplicate): `Skipped`, logged at info
//! - anything else: `Failed`, logged at error
//!
//! Aggregations share nothing but the renderer and the store, so many of them
//! can be driven concurrently from one task.

use crate::config::PipelineConfig;
use crate::dedup::{ArticleStore, DuplicateGate, StoredArticle};
use crate::error::{Classify, ErrorKind, MediaError, PipelineError};
use crate::extract::{self, ExtractOptions};
use crate::fetcher::{ArticleFetcher, Renderer};
use crate::html;
use crate::images::ImagePipeline;
use crate::media::MediaResolver;
use crate::media::icons::IconLookup;
use crate::models::{AggregationOutcome, HeaderElement, IngestJob, NormalizedArticle};
use crate::sanitize::sanitize;
use crate::standardize::{self, StandardizeOptions};
use crate::utils::truncate_for_log;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

enum Flow {
    Stored(NormalizedArticle),
    Skipped(String),
}

pub struct Aggregator<R, S, I> {
    config: PipelineConfig,
    fetcher: ArticleFetcher<R>,
    pipeline: Arc<ImagePipeline<R>>,
    resolver: MediaResolver<R, I>,
    gate: DuplicateGate<S>,
}

impl<R: Renderer, S: ArticleStore, I: IconLookup> Aggregator<R, S, I> {
    pub fn new(
        config: PipelineConfig,
        renderer: Arc<R>,
        store: Arc<S>,
        icons: I,
    ) -> Result<Self, MediaError> {
        let fetcher = ArticleFetcher::new(Arc::clone(&renderer), &config.fetch);
        let pipeline = Arc::new(ImagePipeline::new(renderer, &config.images, &config.fetch)?);
        let resolver = MediaResolver::new(Arc::clone(&pipeline), icons, &config.media);
        let gate = DuplicateGate::new(store, &config.duplicates, &config.fetch);
        Ok(Self {
            config,
            fetcher,
            pipeline,
            resolver,
            gate,
        })
    }

    pub fn store(&self) -> &S {
        self.gate.store()
    }

    /// Run one article through the whole pipeline.
    #[instrument(
        level = "info",
        skip_all,
        fields(url = %job.article.url, provider = %job.article.provider_id, feed = %job.feed.feed_id)
    )]
    pub async fn aggregate(&self, job: &IngestJob) -> AggregationOutcome {
        let t0 = Instant::now();
        let url = job.article.url.clone();
        let result = self.run(job).await;
        let elapsed_ms = t0.elapsed().as_millis() as u64;

        match result {
            Ok(Flow::Stored(article)) => {
                info!(elapsed_ms, bytes = article.canonical_html.len(), "Stored article");
                AggregationOutcome::Stored {
                    article: Box::new(article),
                }
            }
            Ok(Flow::Skipped(reason)) => {
                info!(elapsed_ms, %reason, "Skipped article");
                AggregationOutcome::Skipped { url, reason }
            }
            Err(e) if e.kind() == ErrorKind::SkipWorthy => {
                info!(elapsed_ms, reason = %e, "Skipped article after remote rejection");
                AggregationOutcome::Skipped {
                    url,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                error!(elapsed_ms, error = %e, "Article aggregation failed");
                AggregationOutcome::Failed {
                    url,
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn run(&self, job: &IngestJob) -> Result<Flow, PipelineError> {
        let article = &job.article;
        let feed = &job.feed;
        let profile = self.config.provider(&article.provider_id);

        // 1. fetch
        let raw_html = if profile.fetch_full_article || article.raw_html.trim().is_empty() {
            let options = self.fetcher.default_options();
            let next_page = profile
                .next_page_selector
                .as_deref()
                .filter(|_| profile.max_pages > 1)
                .and_then(|css| match html::selector(css) {
                    Ok(selector) => Some(selector),
                    Err(e) => {
                        warn!(selector = css, error = %e, "Ignoring invalid next-page selector");
                        None
                    }
                });
            match next_page {
                Some(selector) => {
                    self.fetcher
                        .fetch_paginated(&article.url, &selector, profile.max_pages, options)
                        .await?
                }
                None => self.fetcher.fetch_article_html(&article.url, options).await?,
            }
        } else {
            debug!(bytes = article.raw_html.len(), "Using feed-supplied HTML");
            article.raw_html.clone()
        };

        // 2. extract
        let extraction = extract::extract(&raw_html, &ExtractOptions::from(&profile))?;
        if extraction.degraded {
            debug!(
                preview = %truncate_for_log(&extraction.html, 200),
                "Extraction degraded to full body"
            );
        }

        // 3. standardize
        let options = StandardizeOptions {
            generate_header_image: feed.generate_header_image,
            add_source_footer: feed.add_source_footer,
        };
        let standardized = standardize::standardize(
            &self.resolver,
            &extraction.html,
            article,
            options,
            article.header_image_hint.as_deref(),
        )
        .await?;

        // 4. sanitize
        let canonical_html = sanitize(&standardized.html, &self.config.media);

        // 5. duplicate check
        if feed.skip_duplicates {
            let scope = self.gate.scope_for(&feed.feed_id);
            let decision = self
                .gate
                .check_duplicate(article, &scope, feed.force_refresh)
                .await?;
            if decision.should_skip {
                let reason = decision
                    .reason
                    .unwrap_or_else(|| "already stored".to_string());
                return Ok(Flow::Skipped(reason));
            }
        }

        // 6. emit
        let thumbnail = self.thumbnail(&standardized.header).await;
        let normalized = NormalizedArticle {
            title: article.title.clone(),
            canonical_html,
            thumbnail,
            source_url: article.url.clone(),
            provider_id: article.provider_id.clone(),
            published_at: article.published_at,
        };
        self.gate
            .store()
            .record(StoredArticle::from_normalized(&feed.feed_id, &normalized, Utc::now()))
            .await?;
        Ok(Flow::Stored(normalized))
    }

    /// Small preview image for the header element.
    async fn thumbnail(&self, header: &HeaderElement) -> Option<String> {
        match header {
            HeaderElement::Image { thumbnail, .. } => thumbnail.clone(),
            HeaderElement::Embed {
                video_id: Some(id), ..
            } => self
                .pipeline
                .video_thumbnail(id)
                .await
                .map(|image| image.to_data_uri()),
            _ => None,
        }
    }
}
