//! Screenshot normalisation: bound the width, keep the aspect ratio, re-encode as PNG.

use image::imageops::FilterType;
use image::ImageFormat;
use std::io::Cursor;
use thiserror::Error;

/// Default maximum width for screenshots embedded in an export.
pub const DEFAULT_MAX_WIDTH: u32 = 550;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("could not decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("could not encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// A re-encoded PNG together with its size and the size of the image it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ImageNormalizer {
    max_width: u32,
}

impl ImageNormalizer {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width: max_width.max(1),
        }
    }

    /// Decodes `bytes`, shrinks to at most `max_width` pixels wide with Lanczos
    /// resampling, and re-encodes as PNG. Narrower images keep their size.
    pub fn normalize(&self, bytes: &[u8]) -> Result<NormalizedImage, NormalizeError> {
        let source = image::load_from_memory(bytes).map_err(NormalizeError::Decode)?;
        let (source_width, source_height) = (source.width(), source.height());

        let resized = if source_width > self.max_width {
            let height = scaled_height(source_width, source_height, self.max_width);
            source.resize_exact(self.max_width, height, FilterType::Lanczos3)
        } else {
            source
        };

        let mut png = Vec::new();
        resized
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(NormalizeError::Encode)?;

        Ok(NormalizedImage {
            png,
            width: resized.width(),
            height: resized.height(),
            source_width,
            source_height,
        })
    }
}

impl Default for ImageNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH)
    }
}

/// Height for `target_width` at the source aspect ratio, truncated, never zero.
fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = u64::from(height) * u64::from(target_width) / u64::from(width);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}
