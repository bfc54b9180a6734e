use anyhow::Result;
use image::RgbImage;

use crate::detect::result::{Classification, DetectionBox};

/// What a backend can be asked to do.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectionCapability {
    /// Per-frame boxes with class and confidence.
    ObjectDetection,
    /// Boxes that carry a stable `track_id` across frames.
    Tracking,
}

/// Detector capability consumed by the pipeline.
///
/// Implementations wrap a local model, a hosted inference API or a test
/// script. The pipeline calls `infer` once per frame from the ingestion
/// thread and never concurrently.
pub trait Detector: Send {
    /// Backend identifier, used in logs.
    fn name(&self) -> &'static str;

    /// Returns true when the backend supports a capability.
    fn supports(&self, capability: DetectionCapability) -> bool;

    /// Run detection on a frame. The image is borrowed for the call only.
    ///
    /// An error skips this frame; the stream carries on.
    fn infer(&mut self, image: &RgbImage) -> Result<Vec<DetectionBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Image classifier used on subject crops.
pub trait Classifier: Send {
    fn name(&self) -> &'static str;

    /// An error skips the frame and leaves the inspection phase unchanged.
    fn classify(&mut self, crop: &RgbImage) -> Result<Classification>;
}
