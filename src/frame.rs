//! Decoded frames and the crop/encode helpers the strategies share.
//!
//! A `Frame` is owned by the pipeline for exactly one processing cycle. The
//! only part of it that may outlive the cycle is an encoded crop embedded in
//! a detection record, or the annotated copy handed to the state store.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, RgbImage};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::detect::DetectionBox;

/// One decoded image from the device stream.
#[derive(Clone, Debug)]
pub struct Frame {
    image: RgbImage,
    /// Wall-clock time the payload finished arriving.
    pub received_at: SystemTime,
    /// Position in the session, starting at 1.
    pub sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self::with_timestamp(image, sequence, SystemTime::now())
    }

    pub fn with_timestamp(image: RgbImage, sequence: u64, received_at: SystemTime) -> Self {
        Self {
            image,
            received_at,
            sequence,
        }
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn received_at_ms(&self) -> u64 {
        epoch_millis(self.received_at)
    }

    /// Working copy for drawing overlays.
    pub fn to_canvas(&self) -> RgbImage {
        self.image.clone()
    }

    /// Crops a detection box, clamped to the frame. `None` when the clamped
    /// region has no area.
    pub fn crop(&self, det: &DetectionBox) -> Option<RgbImage> {
        let (x, y, w, h) = clamp_region(det, self.width(), self.height())?;
        Some(imageops::crop_imm(&self.image, x, y, w, h).to_image())
    }
}

/// Clamps `det` to a `width x height` image as `(x, y, w, h)`.
pub(crate) fn clamp_region(det: &DetectionBox, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    let x1 = det.x1.clamp(0, width as i32) as u32;
    let x2 = det.x2.clamp(0, width as i32) as u32;
    let y1 = det.y1.clamp(0, height as i32) as u32;
    let y2 = det.y2.clamp(0, height as i32) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some((x1, y1, x2 - x1, y2 - y1))
}

/// JPEG-encodes an RGB image.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

pub fn epoch_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
