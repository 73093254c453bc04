//! The image pipeline: locate, fetch, validate and compress header images.
//!
//! ```text
//! url ──▶ locate ──▶ fetch + validate ──▶ compress ──▶ CompressedImage
//!          │              │
//!          │              └─ rejects HTML, tiny payloads, undecodable bytes
//!          └─ direct link │ video thumbnail tiers │ page meta/svg/img scan
//! ```
//!
//! Locating is I/O bound and runs on the async runtime. Compression is CPU
//! bound and runs on the blocking pool so it never stalls other articles.

pub mod compress;
pub mod fetch;
pub mod locate;

use crate::config::{FetchConfig, ImageConfig};
use crate::error::MediaError;
use crate::fetcher::Renderer;
use crate::models::{CandidateOrigin, CompressedImage, HeaderElement, ImageCandidate};
use crate::retry::RetryPolicy;
use compress::Compressor;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// A compressed header image together with its thumbnail.
#[derive(Debug, Clone)]
pub struct HeaderImage {
    pub image: CompressedImage,
    pub thumbnail: Option<CompressedImage>,
}

impl HeaderImage {
    pub fn into_element(self) -> HeaderElement {
        HeaderElement::Image {
            data_uri: self.image.to_data_uri(),
            content_type: self.image.content_type,
            thumbnail: self.thumbnail.map(|t| t.to_data_uri()),
        }
    }
}

pub struct ImagePipeline<R> {
    client: reqwest::Client,
    renderer: Arc<R>,
    config: ImageConfig,
    compressor: Compressor,
    policy: RetryPolicy,
}

impl<R: Renderer> ImagePipeline<R> {
    pub fn new(
        renderer: Arc<R>,
        images: &ImageConfig,
        fetch: &FetchConfig,
    ) -> Result<Self, MediaError> {
        let client = reqwest::Client::builder()
            .timeout(images.request_timeout())
            .user_agent(fetch.user_agent.as_str())
            .build()
            .map_err(|e| MediaError::Client(e.to_string()))?;
        Ok(Self {
            client,
            renderer,
            config: images.clone(),
            compressor: Compressor::new(images),
            policy: RetryPolicy::from_config(fetch),
        })
    }

    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Locate a header image for `url` and compress it to header bounds.
    ///
    /// `Ok(None)` means nothing usable was found. Errors are reserved for the
    /// article page itself failing to load.
    #[instrument(level = "info", skip(self))]
    pub async fn header_image(&self, url: &str) -> Result<Option<HeaderImage>, MediaError> {
        let Some(candidate) = self.locate(url).await? else {
            info!("No header image candidate found");
            return Ok(None);
        };
        let (Some(bytes), Some(content_type)) = (candidate.bytes, candidate.content_type) else {
            return Err(MediaError::Payload {
                url: candidate.source_url,
                message: "candidate was never downloaded".into(),
            });
        };
        debug!(origin = ?candidate.origin, source = %candidate.source_url, "Compressing header candidate");
        self.header_from_bytes(bytes, content_type).await.map(Some)
    }

    /// Compress source bytes to header bounds and to thumbnail bounds.
    ///
    /// The thumbnail is cut from the source bytes, not from the header
    /// encoding, which the decoder may not read back.
    pub async fn header_from_bytes(
        &self,
        bytes: Vec<u8>,
        content_type: String,
    ) -> Result<HeaderImage, MediaError> {
        let (thumb_w, thumb_h) = (self.config.thumbnail_width, self.config.thumbnail_height);
        let thumbnail = match self
            .compress_bytes(bytes.clone(), content_type.clone(), thumb_w, thumb_h)
            .await
        {
            Ok(thumbnail) => Some(thumbnail),
            Err(e) => {
                debug!(error = %e, "Thumbnail could not be derived");
                None
            }
        };
        let (max_w, max_h) = (self.config.max_width, self.config.max_height);
        let image = self.compress_bytes(bytes, content_type, max_w, max_h).await?;
        info!(
            width = image.width,
            height = image.height,
            bytes = image.bytes.len(),
            content_type = %image.content_type,
            "Compressed header image"
        );
        Ok(HeaderImage { image, thumbnail })
    }

    /// Compress an already-downloaded image off the async runtime.
    pub async fn compress_bytes(
        &self,
        bytes: Vec<u8>,
        content_type: String,
        max_width: u32,
        max_height: u32,
    ) -> Result<CompressedImage, MediaError> {
        let compressor = self.compressor.clone();
        tokio::task::spawn_blocking(move || {
            compressor.compress(&bytes, &content_type, max_width, max_height)
        })
        .await
        .map_err(|e| MediaError::Encode(format!("compression task failed: {e}")))?
    }

    pub(crate) async fn compress_candidate(
        &self,
        candidate: ImageCandidate,
        max_width: u32,
        max_height: u32,
    ) -> Result<CompressedImage, MediaError> {
        let origin = candidate.origin;
        let source = candidate.source_url;
        let (Some(bytes), Some(content_type)) = (candidate.bytes, candidate.content_type) else {
            return Err(MediaError::Payload {
                url: source,
                message: "candidate was never downloaded".into(),
            });
        };
        let compressed = self
            .compress_bytes(bytes, content_type, max_width, max_height)
            .await?;
        debug!(
            ?origin,
            %source,
            width = compressed.width,
            height = compressed.height,
            bytes = compressed.bytes.len(),
            content_type = %compressed.content_type,
            "Compressed image candidate"
        );
        Ok(compressed)
    }

    /// Best available static thumbnail for a video id, compressed to
    /// thumbnail bounds.
    #[instrument(level = "debug", skip(self))]
    pub async fn video_thumbnail(&self, video_id: &str) -> Option<CompressedImage> {
        let candidate = self.video_thumbnail_candidate(video_id).await?;
        let (max_w, max_h) = (self.config.thumbnail_width, self.config.thumbnail_height);
        match self.compress_candidate(candidate, max_w, max_h).await {
            Ok(image) => Some(image),
            Err(e) => {
                debug!(error = %e, "Video thumbnail could not be compressed");
                None
            }
        }
    }

    /// Static thumbnail URLs for a video, best quality first.
    pub(crate) fn thumbnail_tiers(&self, video_id: &str) -> [String; 2] {
        let base = self.config.video_thumbnail_base.trim_end_matches('/');
        [
            format!("{base}/vi/{video_id}/maxresdefault.jpg"),
            format!("{base}/vi/{video_id}/hqdefault.jpg"),
        ]
    }

    pub(crate) async fn video_thumbnail_candidate(&self, video_id: &str) -> Option<ImageCandidate> {
        for url in self.thumbnail_tiers(video_id) {
            let candidate = ImageCandidate::new(url, CandidateOrigin::VideoThumbnail);
            if let Some(found) = self
                .load_candidate(candidate, self.config.min_video_thumbnail_bytes)
                .await
            {
                return Some(found);
            }
        }
        None
    }
}
