//! Document composition: guide snapshot -> blocks -> pages -> PDF bytes.
//!
//! A step whose screenshot cannot be fetched or decoded gets an inline
//! `[Image unavailable: ...]` notice instead of the image; it never fails the document.

pub mod layout;

use crate::blob::BlobStore;
use crate::guides::{Annotation, Guide, Step};
use crate::normalize::ImageNormalizer;
use crate::overlay;
use crate::render;
use image::codecs::jpeg::JpegEncoder;
use layout::{paginate, pdf_safe, Block, EmbeddedImage, TextStyle};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Heading used when a guide has no title.
pub const UNTITLED_GUIDE: &str = "Untitled Guide";

const JPEG_QUALITY: u8 = 90;

/// Gap after a screenshot, and between steps.
const IMAGE_GAP: f32 = 14.4;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Guide has no steps")]
    EmptyInput,
}

/// Inline marker embedded in place of a screenshot that could not be used.
pub fn unavailable_marker(detail: &str) -> String {
    format!("[Image unavailable: {}]", detail)
}

fn non_blank(text: &Option<String>) -> Option<&str> {
    text.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

pub struct DocumentComposer {
    blobs: Arc<dyn BlobStore>,
    normalizer: ImageNormalizer,
}

impl DocumentComposer {
    pub fn new(blobs: Arc<dyn BlobStore>, normalizer: ImageNormalizer) -> Self {
        Self { blobs, normalizer }
    }

    /// Renders the guide to PDF bytes.
    pub async fn compose(
        &self,
        guide: &Guide,
        steps: &[Step],
        annotations: &[Annotation],
    ) -> Result<Vec<u8>, ComposeError> {
        let blocks = self.layout(guide, steps, annotations).await?;
        let pages = paginate(blocks);
        let title = non_blank(&guide.title).unwrap_or(UNTITLED_GUIDE);
        debug!(guide_id = guide.id, pages = pages.len(), "Rendering guide");
        Ok(render::render_pdf(&pages, title))
    }

    /// Builds the block sequence: title, optional description, then one section per
    /// step in ascending `index` order, numbered from 1.
    pub async fn layout(
        &self,
        guide: &Guide,
        steps: &[Step],
        annotations: &[Annotation],
    ) -> Result<Vec<Block>, ComposeError> {
        if steps.is_empty() {
            return Err(ComposeError::EmptyInput);
        }

        let mut ordered: Vec<&Step> = steps.iter().collect();
        ordered.sort_by_key(|step| step.index);

        let mut blocks = vec![
            Block::text(TextStyle::Title, pdf_safe(non_blank(&guide.title).unwrap_or(UNTITLED_GUIDE))),
            Block::Spacer(IMAGE_GAP),
        ];
        if let Some(description) = non_blank(&guide.description) {
            blocks.push(Block::text(TextStyle::Subtitle, pdf_safe(description)));
            blocks.push(Block::Spacer(21.6));
        }

        let total = ordered.len();
        for (position, step) in ordered.into_iter().enumerate() {
            let number = position + 1;
            let title = match non_blank(&step.title) {
                Some(title) => pdf_safe(title),
                None => format!("Step {}", number),
            };
            blocks.push(Block::text(TextStyle::StepHeading, format!("Step {}: {}", number, title)));
            blocks.push(Block::Spacer(7.2));

            if let Some(description) = non_blank(&step.description) {
                blocks.push(Block::text(TextStyle::Body, pdf_safe(description)));
                blocks.push(Block::Spacer(7.2));
            }

            if let Some(key) = non_blank(&step.screenshot_key) {
                let step_annotations: Vec<&Annotation> = annotations
                    .iter()
                    .filter(|a| a.step_id == Some(step.id))
                    .collect();
                match self.screenshot(key, &step_annotations).await {
                    Ok(image) => {
                        blocks.push(Block::Image(image));
                        blocks.push(Block::Spacer(IMAGE_GAP));
                    }
                    Err(detail) => {
                        warn!(
                            guide_id = guide.id,
                            step_id = step.id,
                            key,
                            error = %detail,
                            "Screenshot unavailable, embedding notice"
                        );
                        blocks.push(Block::text(TextStyle::Notice, pdf_safe(&unavailable_marker(&detail))));
                    }
                }
            }

            if number < total {
                blocks.push(Block::Spacer(IMAGE_GAP));
            }
        }

        Ok(blocks)
    }

    /// Fetches, normalises and prepares one screenshot. The error is the detail text
    /// for the unavailable-image notice.
    async fn screenshot(&self, key: &str, annotations: &[&Annotation]) -> Result<EmbeddedImage, String> {
        let bytes = self.blobs.get(key).await.map_err(|err| err.to_string())?;

        let normalizer = self.normalizer;
        let (mut image, source_size) = tokio::task::spawn_blocking(move || prepare_image(normalizer, bytes))
            .await
            .map_err(|err| format!("image processing aborted: {}", err))??;

        if !annotations.is_empty() {
            image.overlay = overlay::overlay_svg(annotations, source_size.0, source_size.1);
        }
        Ok(image)
    }
}

/// Normalises the screenshot and re-encodes it as baseline JPEG for embedding.
///
/// When normalisation fails the original bytes are embedded as-is, provided they can
/// still be decoded. Returns the prepared image and the source pixel size.
fn prepare_image(normalizer: ImageNormalizer, bytes: Vec<u8>) -> Result<(EmbeddedImage, (u32, u32)), String> {
    let (canonical, source_size) = match normalizer.normalize(&bytes) {
        Ok(normalized) => (
            normalized.png,
            Some((normalized.source_width, normalized.source_height)),
        ),
        Err(err) => {
            warn!(error = %err, "Normalisation failed, using original screenshot bytes");
            (bytes, None)
        }
    };

    let decoded = image::load_from_memory(&canonical)
        .map_err(|err| format!("could not decode image: {}", err))?;
    let rgb = decoded.to_rgb8();

    let mut jpeg = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY))
        .map_err(|err| format!("could not encode image: {}", err))?;

    let size = (rgb.width(), rgb.height());
    Ok((
        EmbeddedImage {
            jpeg,
            width: size.0,
            height: size.1,
            overlay: None,
        },
        source_size.unwrap_or(size),
    ))
}
