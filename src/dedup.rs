//! Duplicate detection against previously stored articles.
//!
//! The gate asks an [`ArticleStore`] two questions, in order:
//!
//! 1. Does an article with this URL exist in scope? Skip without a reason;
//!    this is the common case on every feed refresh.
//! 2. Was an article with the same normalized title stored in scope within
//!    the trailing window (14 days by default)? Skip with a reason naming
//!    the title.
//!
//! A forced refresh bypasses both. The check is read-then-decide and not
//! atomic against concurrent workers inserting the same URL; uniqueness in
//! the persistence layer is the real backstop.

use crate::config::{DuplicateConfig, DuplicateScope, FetchConfig};
use crate::error::StoreError;
use crate::models::{DuplicateDecision, NormalizedArticle, RawArticle};
use crate::retry::RetryPolicy;
use crate::utils::normalize_title;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::fs;
use tracing::{debug, info, instrument};

/// Which stored articles a lookup considers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeKey {
    Feed(String),
    Global,
}

impl ScopeKey {
    pub fn for_feed(scope: DuplicateScope, feed_id: &str) -> Self {
        match scope {
            DuplicateScope::PerFeed => ScopeKey::Feed(feed_id.to_string()),
            DuplicateScope::Global => ScopeKey::Global,
        }
    }

    pub fn contains(&self, feed_id: &str) -> bool {
        match self {
            ScopeKey::Feed(id) => id == feed_id,
            ScopeKey::Global => true,
        }
    }
}

/// A persisted article as far as duplicate detection is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArticle {
    pub feed_id: String,
    pub url: String,
    pub title: String,
    pub normalized_title: String,
    pub stored_at: DateTime<Utc>,
}

impl StoredArticle {
    pub fn from_normalized(feed_id: &str, article: &NormalizedArticle, stored_at: DateTime<Utc>) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            url: article.source_url.clone(),
            title: article.title.clone(),
            normalized_title: normalize_title(&article.title),
            stored_at,
        }
    }
}

/// The minimal query contract of the persistence collaborator.
pub trait ArticleStore {
    async fn url_exists(&self, scope: &ScopeKey, url: &str) -> Result<bool, StoreError>;

    /// Most recent article in scope with `normalized_title` stored at or
    /// after `since`.
    async fn title_seen_since(
        &self,
        scope: &ScopeKey,
        normalized_title: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredArticle>, StoreError>;

    async fn record(&self, article: StoredArticle) -> Result<(), StoreError>;
}

/// In-process store, optionally persisted to a JSON file between runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    articles: RwLock<Vec<StoredArticle>>,
}

fn poisoned<T>(_: T) -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_articles(articles: Vec<StoredArticle>) -> Self {
        Self {
            articles: RwLock::new(articles),
        }
    }

    pub fn len(&self) -> usize {
        self.articles.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a store saved by [`MemoryStore::save`]; a missing file is empty.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if !fs::try_exists(path).await? {
            info!("No existing store; starting empty");
            return Ok(Self::new());
        }
        let raw = fs::read(path).await?;
        let articles: Vec<StoredArticle> = serde_json::from_slice(&raw)?;
        info!(count = articles.len(), "Loaded article store");
        Ok(Self::with_articles(articles))
    }

    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let json = {
            let articles = self.articles.read().map_err(poisoned)?;
            serde_json::to_vec_pretty(&*articles)?
        };
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(path.as_ref(), json).await?;
        info!(count = self.len(), "Saved article store");
        Ok(())
    }
}

impl ArticleStore for MemoryStore {
    async fn url_exists(&self, scope: &ScopeKey, url: &str) -> Result<bool, StoreError> {
        let articles = self.articles.read().map_err(poisoned)?;
        Ok(articles
            .iter()
            .any(|a| a.url == url && scope.contains(&a.feed_id)))
    }

    async fn title_seen_since(
        &self,
        scope: &ScopeKey,
        normalized_title: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<StoredArticle>, StoreError> {
        let articles = self.articles.read().map_err(poisoned)?;
        Ok(articles
            .iter()
            .filter(|a| {
                a.normalized_title == normalized_title
                    && a.stored_at >= since
                    && scope.contains(&a.feed_id)
            })
            .max_by_key(|a| a.stored_at)
            .cloned())
    }

    async fn record(&self, article: StoredArticle) -> Result<(), StoreError> {
        let mut articles = self.articles.write().map_err(poisoned)?;
        articles.push(article);
        Ok(())
    }
}

pub struct DuplicateGate<S> {
    store: Arc<S>,
    config: DuplicateConfig,
    policy: RetryPolicy,
}

impl<S: ArticleStore> DuplicateGate<S> {
    pub fn new(store: Arc<S>, config: &DuplicateConfig, fetch: &FetchConfig) -> Self {
        Self {
            store,
            config: config.clone(),
            policy: RetryPolicy::from_config(fetch),
        }
    }

    pub fn scope_for(&self, feed_id: &str) -> ScopeKey {
        ScopeKey::for_feed(self.config.scope, feed_id)
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn check_duplicate(
        &self,
        article: &RawArticle,
        scope: &ScopeKey,
        force_refresh: bool,
    ) -> Result<DuplicateDecision, StoreError> {
        self.check_at(article, scope, force_refresh, Utc::now()).await
    }

    /// [`check_duplicate`](Self::check_duplicate) with an explicit clock.
    #[instrument(level = "info", skip(self, article, now), fields(url = %article.url))]
    pub async fn check_at(
        &self,
        article: &RawArticle,
        scope: &ScopeKey,
        force_refresh: bool,
        now: DateTime<Utc>,
    ) -> Result<DuplicateDecision, StoreError> {
        if force_refresh {
            debug!("Forced refresh; duplicate check bypassed");
            return Ok(DuplicateDecision::allow());
        }

        let store = &self.store;
        let url = article.url.as_str();
        let url_hit = self
            .policy
            .run("url_exists", move || store.url_exists(scope, url))
            .await
            .map_err(|failure| failure.last)?;
        if url_hit {
            debug!("URL already stored");
            return Ok(DuplicateDecision::skip(None));
        }

        let normalized = normalize_title(&article.title);
        if normalized.is_empty() {
            return Ok(DuplicateDecision::allow());
        }
        let since = now - Duration::days(self.config.title_window_days);
        let title = normalized.as_str();
        let seen = self
            .policy
            .run("title_seen_since", move || {
                store.title_seen_since(scope, title, since)
            })
            .await
            .map_err(|failure| failure.last)?;

        match seen {
            Some(previous) => {
                let reason = format!(
                    "an article titled \"{}\" was already stored on {} ({})",
                    article.title,
                    previous.stored_at.format("%Y-%m-%d"),
                    previous.url
                );
                info!(%reason, "Duplicate title within window");
                Ok(DuplicateDecision::skip(Some(reason)))
            }
            None => Ok(DuplicateDecision::allow()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw(url: &str, title: &str) -> RawArticle {
        RawArticle {
            url: url.to_string(),
            title: title.to_string(),
            published_at: Utc::now(),
            provider_id: "example".to_string(),
            raw_html: String::new(),
            header_image_hint: None,
        }
    }

    fn stored(feed: &str, url: &str, title: &str, stored_at: DateTime<Utc>) -> StoredArticle {
        StoredArticle {
            feed_id: feed.to_string(),
            url: url.to_string(),
            title: title.to_string(),
            normalized_title: normalize_title(title),
            stored_at,
        }
    }

    fn fast_fetch() -> FetchConfig {
        FetchConfig {
            max_retries: 2,
            base_delay_ms: 1,
            jitter_ms: 0,
            ..FetchConfig::default()
        }
    }

    fn gate(articles: Vec<StoredArticle>, scope: DuplicateScope) -> DuplicateGate<MemoryStore> {
        let config = DuplicateConfig {
            scope,
            ..DuplicateConfig::default()
        };
        DuplicateGate::new(Arc::new(MemoryStore::with_articles(articles)), &config, &fast_fetch())
    }

    #[tokio::test]
    async fn url_title_and_new_article_decisions() {
        let now = Utc::now();
        let gate = gate(
            vec![stored(
                "feed-a",
                "https://example.com/old",
                "Markets Fall Sharply",
                now - Duration::days(10),
            )],
            DuplicateScope::PerFeed,
        );
        let scope = gate.scope_for("feed-a");

        let decision = gate
            .check_at(&raw("https://example.com/old", "Anything"), &scope, false, now)
            .await
            .unwrap();
        assert_eq!(decision, DuplicateDecision { should_skip: true, reason: None });

        let decision = gate
            .check_at(&raw("https://example.com/new", "Markets fall, sharply!"), &scope, false, now)
            .await
            .unwrap();
        assert!(decision.should_skip);
        assert!(decision.reason.unwrap().contains("Markets fall, sharply!"));

        let decision = gate
            .check_at(&raw("https://example.com/other", "Something new"), &scope, false, now)
            .await
            .unwrap();
        assert_eq!(decision, DuplicateDecision::allow());
    }

    #[tokio::test]
    async fn force_refresh_always_allows() {
        let now = Utc::now();
        let gate = gate(
            vec![stored("feed-a", "https://example.com/a", "Same", now)],
            DuplicateScope::Global,
        );
        let decision = gate
            .check_at(&raw("https://example.com/a", "Same"), &ScopeKey::Global, true, now)
            .await
            .unwrap();
        assert!(!decision.should_skip);
    }

    #[tokio::test]
    async fn titles_outside_window_are_not_duplicates() {
        let now = Utc::now();
        let gate = gate(
            vec![stored("feed-a", "https://example.com/a", "Weekly roundup", now - Duration::days(15))],
            DuplicateScope::PerFeed,
        );
        let decision = gate
            .check_at(&raw("https://example.com/b", "Weekly Roundup"), &gate.scope_for("feed-a"), false, now)
            .await
            .unwrap();
        assert!(!decision.should_skip);
    }

    #[tokio::test]
    async fn scope_limits_what_counts() {
        let now = Utc::now();
        let existing = vec![stored("feed-a", "https://example.com/a", "Shared story", now)];

        let per_feed = gate(existing.clone(), DuplicateScope::PerFeed);
        let decision = per_feed
            .check_at(&raw("https://example.com/a", "Shared story"), &per_feed.scope_for("feed-b"), false, now)
            .await
            .unwrap();
        assert!(!decision.should_skip);

        let global = gate(existing, DuplicateScope::Global);
        let decision = global
            .check_at(&raw("https://example.com/a", "Shared story"), &global.scope_for("feed-b"), false, now)
            .await
            .unwrap();
        assert!(decision.should_skip);
    }

    /// Store that is unavailable for the first `failures` URL lookups.
    struct FlakyStore {
        failures: usize,
        calls: AtomicUsize,
    }

    impl ArticleStore for FlakyStore {
        async fn url_exists(&self, _scope: &ScopeKey, _url: &str) -> Result<bool, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                Err(StoreError::Unavailable("connection reset".into()))
            } else {
                Ok(true)
            }
        }

        async fn title_seen_since(
            &self,
            _scope: &ScopeKey,
            _normalized_title: &str,
            _since: DateTime<Utc>,
        ) -> Result<Option<StoredArticle>, StoreError> {
            Ok(None)
        }

        async fn record(&self, _article: StoredArticle) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn unavailable_store_is_retried() {
        let store = Arc::new(FlakyStore {
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let gate = DuplicateGate::new(store, &DuplicateConfig::default(), &fast_fetch());
        let decision = gate
            .check_duplicate(&raw("https://example.com/a", "t"), &ScopeKey::Global, false)
            .await
            .unwrap();
        assert!(decision.should_skip);
        assert_eq!(gate.store().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn store_round_trips_through_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("state/store.json");
        let store = MemoryStore::load(&path).await.unwrap();
        assert!(store.is_empty());
        store
            .record(stored("feed-a", "https://example.com/a", "Hello", Utc::now()))
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let reloaded = MemoryStore::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded
            .url_exists(&ScopeKey::Feed("feed-a".into()), "https://example.com/a")
            .await
            .unwrap());
    }
}
