//! Pipeline configuration loaded from YAML.
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working configuration. Example:
//!
//! ```yaml
//! fetch:
//!   timeout_ms: 20000
//!   max_retries: 2
//! images:
//!   preferred_format: avif
//!   fallback_format: jpeg
//! duplicates:
//!   scope: global
//! providers:
//!   lite-news:
//!     content_selector: ".article--lite"
//!     selectors_to_remove: [".ad", "nav"]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, instrument};

/// Root configuration for the aggregation pipeline.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub images: ImageConfig,
    pub media: MediaConfig,
    pub duplicates: DuplicateConfig,
    pub providers: HashMap<String, ProviderProfile>,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    #[instrument(level = "info")]
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let config = Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        info!(providers = config.providers.len(), "Loaded pipeline configuration");
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Profile for a provider, falling back to the `default` entry and then
    /// to the built-in profile.
    pub fn provider(&self, provider_id: &str) -> ProviderProfile {
        self.providers
            .get(provider_id)
            .or_else(|| self.providers.get("default"))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub base_delay_ms: u64,
    /// Ceiling for the exponential backoff delay.
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub chrome_executable: Option<String>,
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_ms: 250,
            chrome_executable: None,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Output encodings the compressor can produce for opaque images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LossyFormat {
    Avif,
    Jpeg,
}

impl LossyFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            LossyFormat::Avif => "image/avif",
            LossyFormat::Jpeg => "image/jpeg",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImageConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    pub preferred_format: LossyFormat,
    pub fallback_format: Option<LossyFormat>,
    /// Encoder quality, 1-100.
    pub quality: u8,
    /// AVIF encoder speed, 1 (slowest) - 10 (fastest).
    pub encoder_speed: u8,
    /// Images in the preferred format, within bounds and under this size are
    /// returned untouched.
    pub passthrough_max_bytes: usize,
    pub min_bytes: usize,
    pub min_video_thumbnail_bytes: usize,
    /// Page images declared smaller than this in either dimension are ignored.
    pub min_dimension: u32,
    pub max_page_candidates: usize,
    pub request_timeout_ms: u64,
    pub video_thumbnail_base: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            max_width: 1200,
            max_height: 1200,
            thumbnail_width: 400,
            thumbnail_height: 400,
            preferred_format: LossyFormat::Avif,
            fallback_format: Some(LossyFormat::Jpeg),
            quality: 70,
            encoder_speed: 8,
            passthrough_max_bytes: 100_000,
            min_bytes: 5_000,
            min_video_thumbnail_bytes: 1_000,
            min_dimension: 100,
            max_page_candidates: 5,
            request_timeout_ms: 15_000,
            video_thumbnail_base: "https://img.youtube.com".to_string(),
        }
    }
}

impl ImageConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Header element strategies, in registry order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    EmbedLink,
    CommunityThumbnail,
    Video,
    GenericImage,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 4] = [
        StrategyKind::EmbedLink,
        StrategyKind::CommunityThumbnail,
        StrategyKind::Video,
        StrategyKind::GenericImage,
    ];
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Enabled strategies. Order in the file is ignored; the registry order
    /// always applies.
    pub strategies: Vec<StrategyKind>,
    pub video_proxy_path: String,
    pub embed_container_class: String,
    pub icon_lookup_base: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            strategies: StrategyKind::ALL.to_vec(),
            video_proxy_path: "/video-proxy".to_string(),
            embed_container_class: "video-embed-container".to_string(),
            icon_lookup_base: "https://www.reddit.com".to_string(),
        }
    }
}

/// Which persisted articles count when looking for duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateScope {
    #[default]
    PerFeed,
    Global,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DuplicateConfig {
    pub scope: DuplicateScope,
    pub title_window_days: i64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            scope: DuplicateScope::PerFeed,
            title_window_days: 14,
        }
    }
}

/// Provider-specific extraction settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProviderProfile {
    pub content_selector: String,
    pub selectors_to_remove: Vec<String>,
    /// Render the article page instead of trusting the feed's HTML.
    pub fetch_full_article: bool,
    pub next_page_selector: Option<String>,
    pub max_pages: usize,
}

impl Default for ProviderProfile {
    fn default() -> Self {
        Self {
            content_selector: "article".to_string(),
            selectors_to_remove: vec![
                "nav".to_string(),
                "aside".to_string(),
                "form".to_string(),
                ".advertisement".to_string(),
                ".share-buttons".to_string(),
            ],
            fetch_full_article: false,
            next_page_selector: None,
            max_pages: 1,
        }
    }
}
