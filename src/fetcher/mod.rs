//! Article fetching through a rendering browser.
//!
//! The [`Renderer`] trait is the seam between the pipeline and the browser:
//! [`browser::ChromiumRenderer`] implements it with a lazily launched
//! headless Chromium, tests implement it with canned pages.
//!
//! [`ArticleFetcher::fetch_article_html`] adds the retry discipline on top:
//! timeouts, navigation failures and 5xx responses are retried with
//! exponential backoff, everything else fails on the first attempt.

pub mod browser;

use crate::config::FetchConfig;
use crate::error::{ContentFetchError, FetchError};
use crate::retry::RetryPolicy;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// A rendered page as returned by a [`Renderer`].
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    /// Status of the main document response, when the renderer could see it.
    pub status: Option<u16>,
}

/// Something that can load a URL the way a browser would.
///
/// Each call is independent: implementations open a fresh page/tab per call
/// and close it before returning, on success and on error alike.
pub trait Renderer {
    async fn render(&self, url: &str, timeout: Duration) -> Result<RenderedPage, FetchError>;

    /// Screenshot of the first element matching `selector`, or `None` when
    /// nothing matches.
    async fn screenshot_element(
        &self,
        url: &str,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, FetchError>;
}

/// Per-call fetch limits.
#[derive(Debug, Clone, Copy)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub max_retries: usize,
}

pub struct ArticleFetcher<R> {
    renderer: Arc<R>,
    policy: RetryPolicy,
    defaults: FetchOptions,
}

impl<R: Renderer> ArticleFetcher<R> {
    pub fn new(renderer: Arc<R>, config: &FetchConfig) -> Self {
        Self {
            renderer,
            policy: RetryPolicy::from_config(config),
            defaults: FetchOptions {
                timeout: config.timeout(),
                max_retries: config.max_retries,
            },
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn default_options(&self) -> FetchOptions {
        self.defaults
    }

    /// Render `url` and return its HTML, retrying transient failures.
    #[instrument(level = "info", skip_all, fields(%url))]
    pub async fn fetch_article_html(
        &self,
        url: &str,
        options: FetchOptions,
    ) -> Result<String, ContentFetchError> {
        if let Err(e) = Url::parse(url) {
            return Err(ContentFetchError {
                url: url.to_string(),
                attempts: 0,
                source: FetchError::InvalidUrl(e.to_string()),
            });
        }

        let policy = self.policy.clone().with_max_retries(options.max_retries);
        let renderer = &self.renderer;
        let timeout = options.timeout;

        let result = policy
            .run("fetch_article_html", move || async move {
                let page = renderer.render(url, timeout).await?;
                match page.status {
                    Some(status) if status >= 400 => Err(FetchError::Status(status)),
                    _ => Ok(page.html),
                }
            })
            .await;

        match result {
            Ok(html) => {
                info!(bytes = html.len(), "Fetched article HTML");
                Ok(html)
            }
            Err(failure) => Err(ContentFetchError {
                url: url.to_string(),
                attempts: failure.attempts,
                source: failure.last,
            }),
        }
    }

    /// Fetch an article spread over several pages, following
    /// `next_page_selector` up to `max_pages` pages and concatenating them.
    #[instrument(level = "info", skip_all, fields(%url, max_pages))]
    pub async fn fetch_paginated(
        &self,
        url: &str,
        next_page_selector: &Selector,
        max_pages: usize,
        options: FetchOptions,
    ) -> Result<String, ContentFetchError> {
        let mut combined = self.fetch_article_html(url, options).await?;
        let mut seen = vec![url.to_string()];
        let mut last_html = combined.clone();

        while seen.len() < max_pages {
            let current = seen.last().map(String::as_str).unwrap_or(url);
            let Some(next) = next_page_url(&last_html, current, next_page_selector) else {
                break;
            };
            if seen.contains(&next) {
                debug!(%next, "Pagination loops back; stopping");
                break;
            }
            match self.fetch_article_html(&next, options).await {
                Ok(html) => {
                    combined.push_str(&html);
                    last_html = html;
                    seen.push(next);
                }
                Err(e) => {
                    // Later pages are a bonus; keep what we have.
                    warn!(%next, error = %e, "Follow-up page failed; keeping pages fetched so far");
                    break;
                }
            }
        }

        info!(pages = seen.len(), "Fetched paginated article");
        Ok(combined)
    }
}

fn next_page_url(html: &str, base: &str, selector: &Selector) -> Option<String> {
    let document = Html::parse_document(html);
    let href = document
        .select(selector)
        .find_map(|el| el.value().attr("href"))?;
    let base = Url::parse(base).ok()?;
    base.join(href).ok().map(|u| u.to_string())
}
