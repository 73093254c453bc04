//! Down-only resize and re-encode.
//!
//! Opaque images go to the preferred lossy format (AVIF unless configured
//! otherwise), falling back to the secondary lossy format if the first
//! encode fails. Images with real transparency are stored as lossless WebP.

use super::fetch::read_avif_dimensions;
use crate::config::{ImageConfig, LossyFormat};
use crate::error::MediaError;
use crate::models::CompressedImage;
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageReader};
use std::io::Cursor;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Compressor {
    preferred: LossyFormat,
    fallback: Option<LossyFormat>,
    quality: u8,
    speed: u8,
    passthrough_max_bytes: usize,
}

/// Largest size within `max_width` x `max_height` that keeps the aspect ratio,
/// never larger than the source.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (w.min(width), h.min(height))
}

fn source_dimensions(bytes: &[u8], content_type: &str) -> Option<(u32, u32)> {
    if content_type == "image/avif" {
        return read_avif_dimensions(bytes);
    }
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

fn has_transparency(image: &DynamicImage) -> bool {
    image.color().has_alpha() && image.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX)
}

impl Compressor {
    pub fn new(config: &ImageConfig) -> Self {
        Self {
            preferred: config.preferred_format,
            fallback: config.fallback_format,
            quality: config.quality.clamp(1, 100),
            speed: config.encoder_speed.clamp(1, 10),
            passthrough_max_bytes: config.passthrough_max_bytes,
        }
    }

    pub fn compress(
        &self,
        bytes: &[u8],
        content_type: &str,
        max_width: u32,
        max_height: u32,
    ) -> Result<CompressedImage, MediaError> {
        if let Some(image) = self.passthrough(bytes, content_type, max_width, max_height) {
            return Ok(image);
        }

        let decoded = image::load_from_memory(bytes)?;
        let (src_w, src_h) = (decoded.width(), decoded.height());
        let (w, h) = fit_within(src_w, src_h, max_width, max_height);
        let resized = if (w, h) == (src_w, src_h) {
            decoded
        } else {
            debug!(src_w, src_h, w, h, "Downscaling image");
            decoded.resize_exact(w, h, FilterType::Lanczos3)
        };

        if has_transparency(&resized) {
            let rgba = resized.to_rgba8();
            let mut out = Vec::new();
            WebPEncoder::new_lossless(&mut out).write_image(
                rgba.as_raw(),
                w,
                h,
                ExtendedColorType::Rgba8,
            )?;
            return Ok(CompressedImage {
                bytes: out,
                content_type: "image/webp".to_string(),
                width: w,
                height: h,
            });
        }

        let rgb = resized.to_rgb8();
        let (out, format) = match self.encode_lossy(self.preferred, rgb.as_raw(), w, h) {
            Ok(out) => (out, self.preferred),
            Err(e) => {
                let Some(fallback) = self.fallback.filter(|f| *f != self.preferred) else {
                    return Err(e);
                };
                warn!(error = %e, ?fallback, "Preferred encoder failed; using fallback");
                (self.encode_lossy(fallback, rgb.as_raw(), w, h)?, fallback)
            }
        };

        Ok(CompressedImage {
            bytes: out,
            content_type: format.mime_type().to_string(),
            width: w,
            height: h,
        })
    }

    /// Already in the preferred format, within bounds and small enough.
    fn passthrough(
        &self,
        bytes: &[u8],
        content_type: &str,
        max_width: u32,
        max_height: u32,
    ) -> Option<CompressedImage> {
        if content_type != self.preferred.mime_type() || bytes.len() > self.passthrough_max_bytes {
            return None;
        }
        let (width, height) = source_dimensions(bytes, content_type)?;
        if width > max_width || height > max_height {
            return None;
        }
        debug!(width, height, bytes = bytes.len(), "Image passed through unchanged");
        Some(CompressedImage {
            bytes: bytes.to_vec(),
            content_type: content_type.to_string(),
            width,
            height,
        })
    }

    fn encode_lossy(
        &self,
        format: LossyFormat,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, MediaError> {
        let mut out = Vec::new();
        match format {
            LossyFormat::Avif => AvifEncoder::new_with_speed_quality(&mut out, self.speed, self.quality)
                .write_image(rgb, width, height, ExtendedColorType::Rgb8)?,
            LossyFormat::Jpeg => JpegEncoder::new_with_quality(&mut out, self.quality)
                .write_image(rgb, width, height, ExtendedColorType::Rgb8)?,
        }
        Ok(out)
    }
}
