//! Image fixtures for the mock camera
//!
//! Generates real, decodable JPEGs so the thumbnail step runs against the
//! same bytes a camera would hand over. [`padded_jpeg`] grows an image to an
//! exact byte length by inserting comment segments, which decoders skip.

use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, Rgb, RgbImage};

/// JPEG start-of-image marker
const SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG comment marker
const COM: [u8; 2] = [0xFF, 0xFE];

/// Smallest possible comment segment: marker plus length field
const MIN_SEGMENT: usize = 4;

/// Largest comment segment: marker plus a length field of 0xFFFF
const MAX_SEGMENT: usize = 2 + 0xFFFF;

/// Encode a `width` x `height` gradient as JPEG
pub fn jpeg_bytes(width: u32, height: u32) -> ImageResult<Vec<u8>> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90).encode_image(&img)?;
    Ok(out)
}

/// Pad a JPEG to exactly `target_len` bytes.
///
/// Returns `None` if the input is not a JPEG, is already longer than
/// `target_len`, or the gap is 1-3 bytes (too small for a segment).
pub fn pad_jpeg(jpeg: &[u8], target_len: usize) -> Option<Vec<u8>> {
    if !jpeg.starts_with(&SOI) || target_len < jpeg.len() {
        return None;
    }
    let mut gap = target_len - jpeg.len();
    if gap > 0 && gap < MIN_SEGMENT {
        return None;
    }

    let mut out = Vec::with_capacity(target_len);
    out.extend_from_slice(&SOI);
    while gap > 0 {
        let mut segment = gap.min(MAX_SEGMENT);
        // Never leave a remainder too small for another segment
        let rest = gap - segment;
        if rest > 0 && rest < MIN_SEGMENT {
            segment -= MIN_SEGMENT;
        }
        let length_field = (segment - 2) as u16;
        out.extend_from_slice(&COM);
        out.extend_from_slice(&length_field.to_be_bytes());
        out.resize(out.len() + segment - MIN_SEGMENT, b' ');
        gap -= segment;
    }
    out.extend_from_slice(&jpeg[SOI.len()..]);
    Some(out)
}

/// A decodable JPEG of exactly `target_len` bytes
pub fn padded_jpeg(width: u32, height: u32, target_len: usize) -> Option<Vec<u8>> {
    let jpeg = jpeg_bytes(width, height).ok()?;
    pad_jpeg(&jpeg, target_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jpeg_decodes() {
        let bytes = jpeg_bytes(64, 48).unwrap();
        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn test_padding_hits_exact_length_and_still_decodes() {
        let bytes = padded_jpeg(640, 480, 500_000).unwrap();
        assert_eq!(bytes.len(), 500_000);

        let img = image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (640, 480));
    }

    #[test]
    fn test_padding_edge_gaps() {
        let jpeg = jpeg_bytes(8, 8).unwrap();

        assert_eq!(pad_jpeg(&jpeg, jpeg.len()).unwrap(), jpeg);
        assert!(pad_jpeg(&jpeg, jpeg.len() + 2).is_none());
        assert_eq!(pad_jpeg(&jpeg, jpeg.len() + 4).unwrap().len(), jpeg.len() + 4);
        assert!(pad_jpeg(&jpeg, jpeg.len() - 1).is_none());

        // Gap just over one full segment
        let target = jpeg.len() + MAX_SEGMENT + 2;
        assert_eq!(pad_jpeg(&jpeg, target).unwrap().len(), target);
    }
}
