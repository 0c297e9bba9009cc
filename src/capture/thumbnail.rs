//! Thumbnail generation
//!
//! The source file is read fully into memory first, so no handle on it stays
//! open while decoding. Images already within the size limit are copied
//! byte-for-byte instead of being re-encoded.

use crate::core::config::ThumbnailConfig;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use log::{debug, warn};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

/// Builds `{stem}.{marker}{ext}` previews next to captured images
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    max_edge: u32,
    jpeg_quality: u8,
    marker: String,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::new(&ThumbnailConfig::default())
    }
}

impl ThumbnailGenerator {
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self {
            max_edge: config.max_edge.max(1),
            jpeg_quality: config.jpeg_quality.clamp(1, 100),
            marker: config.marker.clone(),
        }
    }

    /// Sibling path for the thumbnail of `full_path`
    pub fn thumbnail_path(&self, full_path: &Path) -> PathBuf {
        let stem = full_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match full_path.extension() {
            Some(ext) => format!("{}.{}.{}", stem, self.marker, ext.to_string_lossy()),
            None => format!("{}.{}", stem, self.marker),
        };
        full_path.with_file_name(name)
    }

    /// Write a thumbnail for `full_path`. Any failure yields `None`; a capture
    /// without a preview is still a good capture.
    pub fn generate(&self, full_path: &Path) -> Option<PathBuf> {
        let target = self.thumbnail_path(full_path);
        match self.write_thumbnail(full_path, &target) {
            Ok(()) => Some(target),
            Err(reason) => {
                warn!(
                    "No thumbnail for {}: {}",
                    full_path.display(),
                    reason
                );
                None
            }
        }
    }

    fn write_thumbnail(&self, source: &Path, target: &Path) -> Result<(), String> {
        let bytes = fs::read(source).map_err(|e| format!("read failed: {}", e))?;
        let img = image::load_from_memory(&bytes).map_err(|e| format!("decode failed: {}", e))?;

        let (w, h) = img.dimensions();
        if w.max(h) <= self.max_edge {
            debug!("{}x{} already fits, copying as thumbnail", w, h);
            return fs::write(target, &bytes).map_err(|e| format!("write failed: {}", e));
        }

        let resized = img.resize(self.max_edge, self.max_edge, FilterType::Triangle);
        let encoded = self.encode(&resized, target)?;
        fs::write(target, &encoded).map_err(|e| format!("write failed: {}", e))?;

        debug!(
            "Thumbnail {}x{} -> {}x{} at {}",
            w,
            h,
            resized.width(),
            resized.height(),
            target.display()
        );
        Ok(())
    }

    fn encode(&self, img: &DynamicImage, target: &Path) -> Result<Vec<u8>, String> {
        let mut buf = Vec::new();
        match ImageFormat::from_path(target) {
            Ok(format) if format != ImageFormat::Jpeg => {
                img.write_to(&mut Cursor::new(&mut buf), format)
                    .map_err(|e| format!("encode failed: {}", e))?;
            }
            _ => {
                let encoder = JpegEncoder::new_with_quality(&mut buf, self.jpeg_quality);
                DynamicImage::ImageRgb8(img.to_rgb8())
                    .write_with_encoder(encoder)
                    .map_err(|e| format!("JPEG encode failed: {}", e))?;
            }
        }
        Ok(buf)
    }
}
