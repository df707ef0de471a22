//! Video frames and verification snapshots.
//!
//! - `Frame`: one RGB24 video frame in native video resolution.
//! - `Frame::snapshot_jpeg`: the still submitted for verification, the frame with
//!   the exclusion mask painted over it in opaque red.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::error::SentryError;
use crate::mask::ExclusionMask;

/// Color used for excluded cells in snapshots.
pub const MASK_COLOR: [u8; 3] = [0xFF, 0x00, 0x00];

/// One decoded video frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Sequence number assigned by the source, starting at 1.
    pub index: u64,
}

impl Frame {
    /// Wrap RGB24 pixels. Fails when the buffer does not match the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
        })
    }

    /// Single-color frame.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3], index: u64) -> Self {
        let pixels = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            pixels,
            width,
            height,
            index,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Composite the mask over the frame. Mask cells outside the frame are ignored.
    pub fn composite(&self, mask: &ExclusionMask) -> Result<RgbImage, SentryError> {
        let mut image = RgbImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or_else(|| SentryError::BlobEncoding("frame buffer too small".to_string()))?;
        let w = self.width.min(mask.width());
        let h = self.height.min(mask.height());
        for y in 0..h {
            for x in 0..w {
                if mask.is_cell_excluded(x, y) {
                    image.put_pixel(x, y, Rgb(MASK_COLOR));
                }
            }
        }
        Ok(image)
    }

    /// Encode the composited still as JPEG.
    pub fn snapshot_jpeg(&self, mask: &ExclusionMask, quality: u8) -> Result<Vec<u8>, SentryError> {
        if self.width == 0 || self.height == 0 {
            return Err(SentryError::BlobEncoding("empty frame".to_string()));
        }
        let image = self.composite(mask)?;
        let mut bytes = Vec::new();
        JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100))
            .encode_image(&image)
            .map_err(|e| SentryError::BlobEncoding(e.to_string()))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::Point;

    #[test]
    fn rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 1).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2, 1).is_ok());
    }

    #[test]
    fn composite_paints_excluded_cells_red() {
        let frame = Frame::solid(20, 10, [0, 0, 255], 1);
        let mut mask = ExclusionMask::new(2.0);
        mask.ensure_size(20, 10);
        mask.paint(Point::new(5.0, 5.0), Point::new(6.0, 5.0));

        let image = frame.composite(&mask).unwrap();
        assert_eq!(image.get_pixel(5, 5).0, MASK_COLOR);
        assert_eq!(image.get_pixel(15, 5).0, [0, 0, 255]);
    }

    #[test]
    fn snapshot_is_jpeg() {
        let frame = Frame::solid(16, 16, [10, 20, 30], 1);
        let mask = ExclusionMask::new(50.0);
        let bytes = frame.snapshot_jpeg(&mask, 90).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn snapshot_of_empty_frame_fails() {
        let frame = Frame::solid(0, 0, [0, 0, 0], 1);
        let mask = ExclusionMask::new(50.0);
        assert!(matches!(
            frame.snapshot_jpeg(&mask, 90),
            Err(SentryError::BlobEncoding(_))
        ));
    }
}
