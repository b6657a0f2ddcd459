use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use std::path::Path;
use tracing::debug;

use crate::error::{PreviewError, Result};
use super::{Backend, BackendOptions, StagingJob};
use super::text::escape_html;

/// Default bounding box of generated thumbnails
const DEFAULT_MAX_SIZE: u32 = 1024;

/// Asset written next to `index.html` for html previews
pub const HTML_IMAGE_ASSET: &str = "image.png";

/// Raster images scaled down in-process
#[derive(Debug, Clone, Copy)]
pub struct ImageBackend {
    max_size: u32,
}

impl ImageBackend {
    pub fn new(options: BackendOptions) -> Self {
        let max_size = options
            .setting_u64("max_size")
            .map(|v| v.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(DEFAULT_MAX_SIZE);
        Self { max_size }
    }

    fn scale(&self, img: DynamicImage) -> DynamicImage {
        if img.width() > self.max_size || img.height() > self.max_size {
            img.thumbnail(self.max_size, self.max_size)
        } else {
            img
        }
    }

    fn render(&self, source: &Path, job: &StagingJob) -> Result<()> {
        let img = self.scale(image::open(source)?);
        debug!("Scaled {} to {}x{}", source.display(), img.width(), img.height());

        match job.preview_format.as_str() {
            "png" => img.save_with_format(&job.tmp_target, ImageFormat::Png)?,
            // JPEG has no alpha channel
            "jpg" => DynamicImage::ImageRgb8(img.to_rgb8()).save_with_format(&job.tmp_target, ImageFormat::Jpeg)?,
            "gif" => DynamicImage::ImageRgba8(img.to_rgba8()).save_with_format(&job.tmp_target, ImageFormat::Gif)?,
            "html" | "inline" => {
                img.save_with_format(job.tmp_dir.join(HTML_IMAGE_ASSET), ImageFormat::Png)?;
                let alt = source
                    .file_name()
                    .map(|n| escape_html(&n.to_string_lossy()))
                    .unwrap_or_default();
                let tag = format!(
                    "<img src=\"{}\" alt=\"{}\" width=\"{}\" height=\"{}\">",
                    HTML_IMAGE_ASSET,
                    alt,
                    img.width(),
                    img.height()
                );
                let content = if job.preview_format == "html" {
                    format!("<!DOCTYPE html>\n<html>\n<body>\n{}\n</body>\n</html>\n", tag)
                } else {
                    format!("{}\n", tag)
                };
                std::fs::write(&job.tmp_target, content)?;
            }
            other => {
                return Err(PreviewError::WrongArgument(format!(
                    "Image converter cannot produce '{}'",
                    other
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for ImageBackend {
    async fn convert(&self, job: &StagingJob) -> Result<()> {
        // Decoding and encoding are CPU-bound; keep them off the runtime threads
        let backend = *self;
        let job = job.clone();
        tokio::task::spawn_blocking(move || backend.render(&job.source, &job)).await?
    }
}
