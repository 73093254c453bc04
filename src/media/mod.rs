//! Header element resolution.
//!
//! [`MediaResolver::resolve`] walks a fixed registry of strategies and returns
//! the first header element one of them produces:
//!
//! | Strategy | Matches | Produces |
//! |----------|---------|----------|
//! | `EmbedLink` | compact post embed URLs | frame for the URL itself |
//! | `CommunityThumbnail` | community URLs | compressed community icon |
//! | `Video` | URLs carrying a video id | frame on the internal video proxy |
//! | `GenericImage` | everything | image pipeline result |
//!
//! Registry order matters: a compact embed URL is also a community URL, and
//! every URL is a generic image URL. Configuration may disable strategies but
//! never reorders them.
//!
//! A strategy error is logged and the next strategy is tried, except for
//! skip-worthy errors, which abort the chain so the article gets skipped.

pub mod icons;
pub mod providers;

use crate::config::{MediaConfig, StrategyKind};
use crate::error::{Classify, ErrorKind, MediaError};
use crate::fetcher::Renderer;
use crate::images::{HeaderImage, ImagePipeline};
use crate::models::HeaderElement;
use icons::IconLookup;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Strategies in the order they are tried.
pub const REGISTRY: [StrategyKind; 4] = StrategyKind::ALL;

impl StrategyKind {
    pub fn can_handle(self, url: &str) -> bool {
        match self {
            StrategyKind::EmbedLink => providers::is_embed_link(url),
            StrategyKind::CommunityThumbnail => providers::community(url).is_some(),
            StrategyKind::Video => providers::video_id(url).is_some(),
            StrategyKind::GenericImage => true,
        }
    }
}

pub struct MediaResolver<R, I> {
    pipeline: Arc<ImagePipeline<R>>,
    icons: I,
    config: MediaConfig,
    strategies: Vec<StrategyKind>,
}

impl<R: Renderer, I: IconLookup> MediaResolver<R, I> {
    pub fn new(pipeline: Arc<ImagePipeline<R>>, icons: I, config: &MediaConfig) -> Self {
        let strategies = REGISTRY
            .into_iter()
            .filter(|kind| config.strategies.contains(kind))
            .collect();
        Self {
            pipeline,
            icons,
            config: config.clone(),
            strategies,
        }
    }

    pub fn strategies(&self) -> &[StrategyKind] {
        &self.strategies
    }

    /// Turn `url` into at most one header element.
    #[instrument(level = "info", skip(self, alt_text))]
    pub async fn resolve(&self, url: &str, alt_text: &str) -> Result<HeaderElement, MediaError> {
        for &kind in &self.strategies {
            if !kind.can_handle(url) {
                continue;
            }
            match self.create(kind, url).await {
                Ok(Some(element)) => {
                    info!(strategy = ?kind, "Resolved header element");
                    return Ok(element);
                }
                Ok(None) => debug!(strategy = ?kind, "Strategy produced nothing"),
                Err(e) if e.kind() == ErrorKind::SkipWorthy => {
                    info!(strategy = ?kind, reason = %e, "Source rejected media request; skipping article");
                    return Err(e);
                }
                Err(e) => warn!(strategy = ?kind, error = %e, "Strategy failed; trying next"),
            }
        }
        debug!(%alt_text, "No strategy produced a header element");
        Ok(HeaderElement::None)
    }

    async fn create(&self, kind: StrategyKind, url: &str) -> Result<Option<HeaderElement>, MediaError> {
        let container = self.config.embed_container_class.as_str();
        match kind {
            StrategyKind::EmbedLink => Ok(Some(HeaderElement::Embed {
                html: providers::embed_frame(url, container),
                video_id: None,
            })),
            StrategyKind::CommunityThumbnail => {
                let Some(community) = providers::community(url) else {
                    return Ok(None);
                };
                self.community_thumbnail(&community).await
            }
            StrategyKind::Video => Ok(providers::video_id(url).map(|id| HeaderElement::Embed {
                html: providers::video_frame(&id, &self.config.video_proxy_path, container),
                video_id: Some(id),
            })),
            StrategyKind::GenericImage => Ok(self
                .pipeline
                .header_image(url)
                .await?
                .map(HeaderImage::into_element)),
        }
    }

    async fn community_thumbnail(&self, community: &str) -> Result<Option<HeaderElement>, MediaError> {
        let Some(icon_url) = self.icons.community_icon(community).await? else {
            return Ok(None);
        };
        // Icons are legitimately small; use the thumbnail floor.
        let floor = self.pipeline.config().min_video_thumbnail_bytes;
        let Some((bytes, content_type)) = self.pipeline.fetch_validated(&icon_url, floor).await else {
            return Ok(None);
        };
        let header = self.pipeline.header_from_bytes(bytes, content_type).await?;
        Ok(Some(header.into_element()))
    }
}
