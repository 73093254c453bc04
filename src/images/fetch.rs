//! Downloading and validating candidate images.
//!
//! Ambiguous markup produces a lot of junk candidates: tracking pixels, HTML
//! error pages served with a `.jpg` URL, SVG icons. Rejecting those is the
//! normal case, so everything in here reports a rejection as `None` and logs
//! at debug level instead of returning an error.

use super::ImagePipeline;
use crate::error::MediaError;
use crate::fetcher::Renderer;
use crate::models::ImageCandidate;
use image::{ImageFormat, ImageReader};
use reqwest::header::CONTENT_TYPE;
use std::io::Cursor;
use tracing::{debug, instrument};
use url::Url;

/// Image MIME type implied by the URL's path extension.
pub fn content_type_from_url(url: &str) -> Option<&'static str> {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.split(['?', '#']).next().unwrap_or(url).to_string());
    let (_, ext) = path.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if ext == "svg" {
        return Some("image/svg+xml");
    }
    ImageFormat::from_extension(&ext).map(|format| format.to_mime_type())
}

/// Whether the URL path points straight at an image file.
pub fn has_image_extension(url: &str) -> bool {
    content_type_from_url(url).is_some()
}

fn normalize_content_type(raw: &str) -> String {
    raw.split(';')
        .next()
        .unwrap_or(raw)
        .trim()
        .to_ascii_lowercase()
}

/// Width and height of an AVIF payload, read from its `ispe` property box.
pub fn read_avif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let pos = bytes.windows(4).position(|w| w == b"ispe")?;
    // Box type is followed by a 4 byte version/flags field.
    let body = bytes.get(pos + 8..pos + 16)?;
    let width = u32::from_be_bytes(body[0..4].try_into().ok()?);
    let height = u32::from_be_bytes(body[4..8].try_into().ok()?);
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Confirm that `bytes` really is a raster image of `content_type` and return
/// its dimensions.
pub fn validate_image(bytes: &[u8], content_type: &str) -> Result<(u32, u32), MediaError> {
    let content_type = normalize_content_type(content_type);
    if !content_type.starts_with("image/") {
        return Err(MediaError::Decode(format!("not an image: {content_type}")));
    }
    if content_type == "image/svg+xml" {
        return Err(MediaError::Decode("vector images are not supported".into()));
    }
    if content_type == "image/avif" {
        return read_avif_dimensions(bytes)
            .ok_or_else(|| MediaError::Decode("AVIF payload has no ispe box".into()));
    }
    let decoded = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| MediaError::Decode(e.to_string()))?
        .decode()?;
    Ok((decoded.width(), decoded.height()))
}

/// [`validate_image`] on the blocking pool, handing the bytes back.
///
/// Decoding a large candidate takes long enough to stall every other article
/// sharing the runtime worker.
pub async fn validate_image_blocking(
    bytes: Vec<u8>,
    content_type: String,
) -> Result<(Vec<u8>, (u32, u32)), MediaError> {
    tokio::task::spawn_blocking(move || {
        validate_image(&bytes, &content_type).map(|dimensions| (bytes, dimensions))
    })
    .await
    .map_err(|e| MediaError::Decode(format!("validation task failed: {e}")))?
}

impl<R: Renderer> ImagePipeline<R> {
    /// Download `url` and return its bytes and content type if it is a valid
    /// image of at least `min_bytes`.
    #[instrument(level = "debug", skip(self))]
    pub async fn fetch_validated(&self, url: &str, min_bytes: usize) -> Option<(Vec<u8>, String)> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "Image request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            debug!(status = response.status().as_u16(), "Image request rejected");
            return None;
        }

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(normalize_content_type)
            .filter(|ct| !ct.is_empty() && ct != "application/octet-stream");
        let content_type = match declared.or_else(|| content_type_from_url(url).map(String::from)) {
            Some(ct) => ct,
            None => {
                debug!("No content type could be determined");
                return None;
            }
        };
        if !content_type.starts_with("image/") {
            debug!(%content_type, "Not an image");
            return None;
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                debug!(error = %e, "Image body could not be read");
                return None;
            }
        };
        if bytes.len() < min_bytes {
            debug!(bytes = bytes.len(), min_bytes, "Image below size floor");
            return None;
        }

        match validate_image_blocking(bytes, content_type.clone()).await {
            Ok((bytes, (width, height))) => {
                debug!(width, height, bytes = bytes.len(), %content_type, "Accepted image");
                Some((bytes, content_type))
            }
            Err(e) => {
                debug!(error = %e, "Image failed validation");
                None
            }
        }
    }

    /// Fill in a candidate's bytes, or drop it.
    pub async fn load_candidate(
        &self,
        mut candidate: ImageCandidate,
        min_bytes: usize,
    ) -> Option<ImageCandidate> {
        let (bytes, content_type) = self.fetch_validated(&candidate.source_url, min_bytes).await?;
        candidate.bytes = Some(bytes);
        candidate.content_type = Some(content_type);
        Some(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::tests::{pipeline, png_bytes};

    #[test]
    fn content_type_guessed_from_extension() {
        assert_eq!(
            content_type_from_url("https://cdn.example.com/a/photo.JPG?w=300"),
            Some("image/jpeg")
        );
        assert_eq!(
            content_type_from_url("https://example.com/logo.svg"),
            Some("image/svg+xml")
        );
        assert_eq!(content_type_from_url("https://example.com/story.html"), None);
        assert!(!has_image_extension("https://example.com/story"));
    }

    #[test]
    fn html_payload_fails_validation() {
        let err = validate_image(b"<html>nope</html>", "image/jpeg").unwrap_err();
        assert!(matches!(err, MediaError::Decode(_)));
        assert!(validate_image(&png_bytes(10, 10), "text/html").is_err());
    }

    #[test]
    fn avif_dimensions_come_from_ispe_box() {
        let mut bytes = vec![0u8; 12];
        bytes.extend_from_slice(b"ispe");
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&640u32.to_be_bytes());
        bytes.extend_from_slice(&480u32.to_be_bytes());
        assert_eq!(read_avif_dimensions(&bytes), Some((640, 480)));
        assert_eq!(validate_image(&bytes, "image/avif").unwrap(), (640, 480));
        assert_eq!(read_avif_dimensions(b"no box here"), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn validation_yields_to_other_tasks() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        tokio::spawn(async move { flag.store(true, Ordering::SeqCst) });

        let bytes = png_bytes(1200, 900);
        let (returned, dimensions) = validate_image_blocking(bytes.clone(), "image/png".into())
            .await
            .unwrap();
        assert_eq!(dimensions, (1200, 900));
        assert_eq!(returned, bytes);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn accepts_valid_image_and_guesses_missing_content_type() {
        let mut server = mockito::Server::new_async().await;
        let body = png_bytes(300, 200);
        let mock = server
            .mock("GET", "/photo.png")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let pipeline = pipeline();
        let url = format!("{}/photo.png", server.url());
        let (bytes, content_type) = pipeline.fetch_validated(&url, 100).await.unwrap();
        mock.assert_async().await;
        assert_eq!(bytes, body);
        assert_eq!(content_type, "image/png");
    }

    #[tokio::test]
    async fn rejects_non_images_small_payloads_and_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/page.jpg")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html></html>")
            .create_async()
            .await;
        server
            .mock("GET", "/tiny.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(png_bytes(2, 2))
            .create_async()
            .await;
        server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/broken.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![7u8; 6000])
            .create_async()
            .await;

        let pipeline = pipeline();
        for path in ["/page.jpg", "/tiny.png", "/missing.png", "/broken.png"] {
            let url = format!("{}{}", server.url(), path);
            assert!(
                pipeline.fetch_validated(&url, 1000).await.is_none(),
                "{path} should be rejected"
            );
        }
    }
}
