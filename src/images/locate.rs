//! Finding the best header image candidate for a URL.
//!
//! Order of attempts:
//! 1. the URL itself, when its path has an image extension
//! 2. static video thumbnails, best tier first, when the URL names a video
//! 3. the page: `og:image`, `twitter:image`, a screenshot of an inline
//!    `<svg>`, then the first few full-size `<img>` elements

use super::ImagePipeline;
use super::fetch::{has_image_extension, validate_image_blocking};
use crate::error::MediaError;
use crate::fetcher::Renderer;
use crate::html;
use crate::media::providers;
use crate::models::{CandidateOrigin, ImageCandidate};
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

const SVG_SELECTORS: [&str; 3] = ["article svg", "main svg", "svg"];

static STYLE_WIDTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[;\s])width\s*:\s*(\d+)px").expect("valid regex"));
static STYLE_HEIGHT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:^|[;\s])height\s*:\s*(\d+)px").expect("valid regex"));

static OG_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[property="og:image"], meta[name="og:image"]"#).expect("valid selector")
});
static TWITTER_IMAGE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"meta[name="twitter:image"], meta[property="twitter:image"]"#)
        .expect("valid selector")
});
static IMG: Lazy<Selector> = Lazy::new(|| Selector::parse("img").expect("valid selector"));

/// Media references found in a page, in the order they should be tried.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PageMedia {
    pub open_graph: Option<String>,
    pub twitter: Option<String>,
    /// Selector whose first match is an inline SVG worth screenshotting.
    pub svg_selector: Option<&'static str>,
    pub images: Vec<String>,
}

/// Leading integer of an attribute such as `width="640"` or `width="640px"`.
fn declared_px(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.ends_with('%') {
        return None;
    }
    let digits: String = value.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Whether an element declares itself smaller than `min` in either dimension.
fn declared_too_small(element: &ElementRef<'_>, min: u32) -> bool {
    let el = element.value();
    let style = el.attr("style").unwrap_or_default();
    let width = el
        .attr("width")
        .and_then(declared_px)
        .or_else(|| STYLE_WIDTH.captures(style).and_then(|c| c[1].parse().ok()));
    let height = el
        .attr("height")
        .and_then(declared_px)
        .or_else(|| STYLE_HEIGHT.captures(style).and_then(|c| c[1].parse().ok()));
    width.is_some_and(|w| w < min) || height.is_some_and(|h| h < min)
}

fn absolutize(base: Option<&Url>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with("data:") {
        return None;
    }
    match base {
        Some(base) => base.join(raw).ok().map(|u| u.to_string()),
        None => Url::parse(raw).ok().map(|u| u.to_string()),
    }
}

fn meta_content(document: &Html, selector: &Selector, base: Option<&Url>) -> Option<String> {
    document
        .select(selector)
        .filter_map(|meta| meta.value().attr("content"))
        .find_map(|content| absolutize(base, content))
}

/// Collect header image references from a page.
pub fn scan_page(page_html: &str, page_url: &str, min_dimension: u32, limit: usize) -> PageMedia {
    let document = Html::parse_document(page_html);
    let base = Url::parse(page_url).ok();
    let base = base.as_ref();

    let svg_selector = SVG_SELECTORS.into_iter().find(|css| {
        html::selector(css)
            .ok()
            .and_then(|sel| document.select(&sel).next().map(|svg| !declared_too_small(&svg, min_dimension)))
            .unwrap_or(false)
    });

    let images = document
        .select(&IMG)
        .filter(|img| !declared_too_small(img, min_dimension))
        .filter_map(|img| {
            let el = img.value();
            el.attr("src")
                .filter(|src| !src.trim().starts_with("data:"))
                .or_else(|| el.attr("data-src"))
        })
        .filter_map(|src| absolutize(base, src))
        .filter(|src| !src.to_ascii_lowercase().split(['?', '#']).next().unwrap_or("").ends_with(".svg"))
        .unique()
        .take(limit)
        .collect();

    PageMedia {
        open_graph: meta_content(&document, &OG_IMAGE, base),
        twitter: meta_content(&document, &TWITTER_IMAGE, base),
        svg_selector,
        images,
    }
}

impl<R: Renderer> ImagePipeline<R> {
    /// Find and download the first acceptable candidate for `url`.
    ///
    /// Individual candidates failing is expected and only logged. The only
    /// error is the page itself failing to load; a 4xx there is skip-worthy.
    #[instrument(level = "info", skip(self))]
    pub async fn locate(&self, url: &str) -> Result<Option<ImageCandidate>, MediaError> {
        let min_bytes = self.config.min_bytes;

        if has_image_extension(url) {
            let candidate = ImageCandidate::new(url, CandidateOrigin::DirectLink);
            return Ok(self.load_candidate(candidate, min_bytes).await);
        }

        if let Some(video_id) = providers::video_id(url) {
            if let Some(found) = self.video_thumbnail_candidate(&video_id).await {
                info!(%video_id, source = %found.source_url, "Using video thumbnail");
                return Ok(Some(found));
            }
            debug!(%video_id, "No video thumbnail tier downloaded; scanning page");
        }

        let page = self.fetch_page(url).await?;
        let media = scan_page(
            &page,
            url,
            self.config.min_dimension,
            self.config.max_page_candidates,
        );
        debug!(?media, "Scanned page for images");

        for (origin, source) in [
            (CandidateOrigin::OpenGraph, media.open_graph),
            (CandidateOrigin::TwitterCard, media.twitter),
        ] {
            let Some(source) = source else { continue };
            let candidate = ImageCandidate::new(source, origin);
            if let Some(found) = self.load_candidate(candidate, min_bytes).await {
                info!(?origin, source = %found.source_url, "Found header image");
                return Ok(Some(found));
            }
        }

        if let Some(selector) = media.svg_selector {
            if let Some(found) = self.screenshot_svg(url, selector).await {
                info!(selector, "Using inline SVG screenshot");
                return Ok(Some(found));
            }
        }

        for source in media.images {
            let candidate = ImageCandidate::new(source, CandidateOrigin::PageImage);
            if let Some(found) = self.load_candidate(candidate, min_bytes).await {
                info!(source = %found.source_url, "Found page image");
                return Ok(Some(found));
            }
        }

        Ok(None)
    }

    async fn screenshot_svg(&self, url: &str, selector: &str) -> Option<ImageCandidate> {
        let shot = self
            .renderer
            .screenshot_element(url, selector, self.config.request_timeout())
            .await;
        let bytes = match shot {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                debug!(error = %e, "SVG screenshot failed");
                return None;
            }
        };
        match validate_image_blocking(bytes, "image/png".to_string()).await {
            Ok((bytes, (w, h))) if w >= self.config.min_dimension && h >= self.config.min_dimension => {
                let mut candidate = ImageCandidate::new(url, CandidateOrigin::InlineSvg);
                candidate.bytes = Some(bytes);
                candidate.content_type = Some("image/png".to_string());
                Some(candidate)
            }
            Ok((_, (w, h))) => {
                debug!(w, h, "SVG screenshot too small");
                None
            }
            Err(e) => {
                debug!(error = %e, "SVG screenshot is not a valid image");
                None
            }
        }
    }

    /// GET a page's HTML, retrying transient failures.
    pub(crate) async fn fetch_page(&self, url: &str) -> Result<String, MediaError> {
        let client = self.client();
        self.policy()
            .run("fetch_page", move || async move {
                let response = client
                    .get(url)
                    .send()
                    .await
                    .and_then(|r| r.error_for_status())
                    .map_err(|e| MediaError::from_reqwest(url, e))?;
                response
                    .text()
                    .await
                    .map_err(|e| MediaError::from_reqwest(url, e))
            })
            .await
            .map_err(|failure| failure.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Classify, ErrorKind};
    use crate::fetcher::tests::ScriptedRenderer;
    use crate::images::tests::{jpeg_bytes, pipeline, pipeline_with, png_bytes, test_config};

    #[test]
    fn scan_page_orders_and_filters_candidates() {
        let page = r#"<html><head>
            <meta property="og:image" content="/og.jpg">
            <meta name="twitter:image" content="https://cdn.example.com/tw.jpg">
        </head><body>
            <img src="/pixel.gif" width="1" height="1">
            <img src="/icon.png" style="width: 32px; height: 32px">
            <img src="data:image/png;base64,AAAA" data-src="/lazy.jpg">
            <img src="/logo.svg">
            <img src="/photo.jpg" width="800" height="600">
            <img src="/photo.jpg">
            <svg width="24" height="24"></svg>
        </body></html>"#;
        let media = scan_page(page, "https://example.com/story/1", 100, 5);
        assert_eq!(media.open_graph.as_deref(), Some("https://example.com/og.jpg"));
        assert_eq!(media.twitter.as_deref(), Some("https://cdn.example.com/tw.jpg"));
        assert_eq!(media.svg_selector, None);
        assert_eq!(
            media.images,
            vec![
                "https://example.com/lazy.jpg".to_string(),
                "https://example.com/photo.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn scan_page_caps_candidates_and_finds_large_svg() {
        let imgs: String = (0..8).map(|i| format!(r#"<img src="/{i}.jpg">"#)).collect();
        let page = format!(r#"<html><body><main><svg viewBox="0 0 800 400"></svg></main>{imgs}</body></html>"#);
        let media = scan_page(&page, "https://example.com/", 100, 5);
        assert_eq!(media.images.len(), 5);
        assert_eq!(media.svg_selector, Some("main svg"));
    }

    #[tokio::test]
    async fn falls_through_invalid_og_image_to_twitter_card() {
        let mut server = mockito::Server::new_async().await;
        let page = format!(
            r#"<html><head>
                <meta property="og:image" content="{0}/og.jpg">
                <meta name="twitter:image" content="{0}/tw.jpg">
            </head><body></body></html>"#,
            server.url()
        );
        server
            .mock("GET", "/story")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(page)
            .create_async()
            .await;
        server
            .mock("GET", "/og.jpg")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>login wall</html>")
            .create_async()
            .await;
        server
            .mock("GET", "/tw.jpg")
            .with_status(200)
            .with_header("content-type", "image/jpeg")
            .with_body(jpeg_bytes(640, 360))
            .create_async()
            .await;

        let pipeline = pipeline();
        let found = pipeline
            .locate(&format!("{}/story", server.url()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.origin, CandidateOrigin::TwitterCard);
        assert!(found.bytes.is_some());
    }

    #[tokio::test]
    async fn svg_screenshot_used_before_page_images() {
        let mut server = mockito::Server::new_async().await;
        let url = format!("{}/chart", server.url());
        server
            .mock("GET", "/chart")
            .with_status(200)
            .with_body(r#"<html><body><article><svg width="600" height="300"></svg><img src="/photo.jpg"></article></body></html>"#)
            .create_async()
            .await;
        let photo = server
            .mock("GET", "/photo.jpg")
            .expect(0)
            .create_async()
            .await;

        let renderer = ScriptedRenderer::default();
        renderer
            .screenshots
            .lock()
            .unwrap()
            .insert(url.clone(), png_bytes(600, 300));
        let pipeline = pipeline_with(renderer, test_config().0);
        let found = pipeline.locate(&url).await.unwrap().unwrap();
        assert_eq!(found.origin, CandidateOrigin::InlineSvg);
        assert_eq!(found.content_type.as_deref(), Some("image/png"));
        photo.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_page_is_skip_worthy() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/private")
            .with_status(403)
            .create_async()
            .await;
        let err = pipeline()
            .locate(&format!("{}/private", server.url()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SkipWorthy);
    }

    #[tokio::test]
    async fn page_without_images_yields_nothing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/text")
            .with_status(200)
            .with_body("<html><body><p>words only</p></body></html>")
            .create_async()
            .await;
        let found = pipeline()
            .locate(&format!("{}/text", server.url()))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
