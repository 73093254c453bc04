//! Data models flowing through the aggregation pipeline.
//!
//! - [`RawArticle`]: immutable input from the feed-parsing collaborator
//! - [`FeedSettings`]: per-feed flags from the management application
//! - [`HeaderElement`]: the single representative media chosen for an article
//! - [`ImageCandidate`] / [`CompressedImage`]: transient image pipeline values
//! - [`NormalizedArticle`]: final output handed to persistence
//! - [`DuplicateDecision`] / [`AggregationOutcome`]: decisions and results

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw article as produced by the upstream feed parser.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawArticle {
    pub url: String,
    pub title: String,
    pub published_at: DateTime<Utc>,
    pub provider_id: String,
    #[serde(default)]
    pub raw_html: String,
    #[serde(default)]
    pub header_image_hint: Option<String>,
}

/// Per-feed flags supplied alongside each article.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    pub feed_id: String,
    pub generate_header_image: bool,
    pub add_source_footer: bool,
    pub skip_duplicates: bool,
    /// Only set by an explicit manual reload.
    pub force_refresh: bool,
}

/// One unit of work for the aggregator.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IngestJob {
    pub article: RawArticle,
    #[serde(default)]
    pub feed: FeedSettings,
}

/// The representative media placed in an article's `<header>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderElement {
    /// Inline frame markup. `video_id` is set for proxied video players.
    Embed {
        html: String,
        video_id: Option<String>,
    },
    Image {
        data_uri: String,
        content_type: String,
        /// The same source image at thumbnail bounds, as a data URI.
        thumbnail: Option<String>,
    },
    None,
}

impl HeaderElement {
    pub fn is_none(&self) -> bool {
        matches!(self, HeaderElement::None)
    }

    /// Markup to place inside `<header>`, if any.
    pub fn to_html(&self, alt_text: &str) -> Option<String> {
        match self {
            HeaderElement::Embed { html, .. } => Some(html.clone()),
            HeaderElement::Image { data_uri, .. } => Some(format!(
                r#"<img alt="{}" src="{}">"#,
                crate::html::escape_attr(alt_text),
                data_uri
            )),
            HeaderElement::None => None,
        }
    }

    /// Thumbnail data URI carried by an image header.
    pub fn thumbnail(&self) -> Option<&str> {
        match self {
            HeaderElement::Image { thumbnail, .. } => thumbnail.as_deref(),
            _ => None,
        }
    }

    /// Decoded bytes of an image header.
    pub fn image_bytes(&self) -> Option<(Vec<u8>, &str)> {
        match self {
            HeaderElement::Image {
                data_uri,
                content_type,
                ..
            } => {
                let (_, payload) = data_uri.split_once(";base64,")?;
                let bytes = STANDARD.decode(payload).ok()?;
                Some((bytes, content_type.as_str()))
            }
            _ => None,
        }
    }
}

/// Where an image candidate was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    DirectLink,
    VideoThumbnail,
    OpenGraph,
    TwitterCard,
    InlineSvg,
    PageImage,
    CommunityIcon,
}

/// A candidate header image; never persisted.
#[derive(Debug, Clone)]
pub struct ImageCandidate {
    pub source_url: String,
    pub origin: CandidateOrigin,
    pub bytes: Option<Vec<u8>>,
    pub content_type: Option<String>,
}

impl ImageCandidate {
    pub fn new(source_url: impl Into<String>, origin: CandidateOrigin) -> Self {
        Self {
            source_url: source_url.into(),
            origin,
            bytes: None,
            content_type: None,
        }
    }
}

/// Output of the image compressor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub width: u32,
    pub height: u32,
}

impl CompressedImage {
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.content_type, STANDARD.encode(&self.bytes))
    }
}

/// The final, storable article.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedArticle {
    pub title: String,
    pub canonical_html: String,
    pub thumbnail: Option<String>,
    pub source_url: String,
    pub provider_id: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateDecision {
    pub should_skip: bool,
    pub reason: Option<String>,
}

impl DuplicateDecision {
    pub fn allow() -> Self {
        Self {
            should_skip: false,
            reason: None,
        }
    }

    pub fn skip(reason: Option<String>) -> Self {
        Self {
            should_skip: true,
            reason,
        }
    }
}

/// Result of aggregating one article.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationOutcome {
    Stored { article: Box<NormalizedArticle> },
    Skipped { url: String, reason: String },
    Failed { url: String, reason: String },
}

impl AggregationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            AggregationOutcome::Stored { .. } => "stored",
            AggregationOutcome::Skipped { .. } => "skipped",
            AggregationOutcome::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_article_deserializes_from_feed_json() {
        let json = r#"{
            "url": "https://example.com/a",
            "title": "Hello",
            "publishedAt": "2025-05-06T14:30:00Z",
            "providerId": "example",
            "headerImageHint": "https://example.com/a.jpg"
        }"#;
        let article: RawArticle = serde_json::from_str(json).unwrap();
        assert_eq!(article.provider_id, "example");
        assert!(article.raw_html.is_empty());
        assert_eq!(
            article.header_image_hint.as_deref(),
            Some("https://example.com/a.jpg")
        );
    }

    #[test]
    fn ingest_job_defaults_feed_settings() {
        let json = r#"{"article": {
            "url": "https://example.com/a",
            "title": "Hello",
            "publishedAt": "2025-05-06T14:30:00Z",
            "providerId": "example"
        }}"#;
        let job: IngestJob = serde_json::from_str(json).unwrap();
        assert!(!job.feed.force_refresh);
        assert!(!job.feed.generate_header_image);
    }

    #[test]
    fn image_header_round_trips_its_bytes() {
        let image = CompressedImage {
            bytes: vec![1, 2, 3, 4],
            content_type: "image/png".to_string(),
            width: 1,
            height: 1,
        };
        let header = HeaderElement::Image {
            data_uri: image.to_data_uri(),
            content_type: image.content_type.clone(),
            thumbnail: None,
        };
        let (bytes, ct) = header.image_bytes().unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4]);
        assert_eq!(ct, "image/png");
        assert!(header.to_html("a \"quote\"").unwrap().contains("a &quot;quote&quot;"));
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let outcome = AggregationOutcome::Skipped {
            url: "https://example.com".into(),
            reason: "duplicate".into(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains(r#""kind":"skipped""#));
        assert_eq!(outcome.label(), "skipped");
    }
}
