//! Detection pipeline dispatcher.
//!
//! The strategy is picked once, when the dispatcher is built, and stays
//! fixed for the dispatcher's lifetime. Each call to [`Dispatcher::process`]
//! handles exactly one frame end-to-end: detector call(s), overlays, and the
//! store update.

mod inspection;
mod summary;
mod tracking;

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::detect::{Classifier, DetectionBox, DetectionCapability, Detector, LazyDetector};
use crate::error::{FailureClass, PipelineError};
use crate::frame::Frame;
use crate::state::DetectionStateStore;

pub use inspection::InspectionStrategy;
pub use summary::SummaryStrategy;
pub use tracking::TrackingStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Persistent identities from a tracking detector.
    Tracking,
    /// Subject classification, then defect detection.
    Inspection,
    /// Stateless per-frame class summary.
    Summary,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Tracking => "tracking",
            StrategyKind::Inspection => "inspection",
            StrategyKind::Summary => "summary",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tracking" | "track_registry" => Ok(StrategyKind::Tracking),
            "inspection" => Ok(StrategyKind::Inspection),
            "summary" | "hosted" => Ok(StrategyKind::Summary),
            other => Err(anyhow!(
                "unknown mode {:?} (expected tracking, inspection or summary)",
                other
            )),
        }
    }
}

/// Thresholds and encoding options shared by all strategies.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Boxes below this confidence are dropped before any strategy sees them.
    pub coarse_confidence: f32,
    /// Subject detections must exceed this to be classified.
    pub trusted_confidence: f32,
    pub subject_class: String,
    pub jpeg_quality: u8,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            coarse_confidence: 0.4,
            trusted_confidence: 0.6,
            subject_class: "car".to_string(),
            jpeg_quality: 85,
        }
    }
}

/// Detector capabilities handed to the dispatcher.
///
/// `primary` is the per-frame detector for tracking and summary, and the
/// coarse subject detector for inspection. Inspection additionally needs
/// `classifier` and `defect`.
pub struct DetectorSet {
    pub primary: Box<dyn Detector>,
    pub classifier: Option<Box<dyn Classifier>>,
    pub defect: Option<LazyDetector>,
}

impl DetectorSet {
    pub fn new(primary: Box<dyn Detector>) -> Self {
        Self {
            primary,
            classifier: None,
            defect: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_defect(mut self, defect: LazyDetector) -> Self {
        self.defect = Some(defect);
        self
    }
}

/// One selectable detection algorithm.
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Clears per-session state. Called before the first frame.
    fn begin(&mut self) {}

    /// Runs one frame and writes the result to `store`.
    fn process(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Processed,
    /// A detector call failed; the store was not updated for this frame.
    Skipped,
}

pub struct Dispatcher {
    strategy: Box<dyn Strategy>,
}

impl Dispatcher {
    /// Builds the strategy for `kind`, checking that the capabilities it
    /// needs are present.
    pub fn from_mode(kind: StrategyKind, detectors: DetectorSet, settings: PipelineSettings) -> Result<Self> {
        let DetectorSet {
            primary,
            classifier,
            defect,
        } = detectors;

        if !primary.supports(DetectionCapability::ObjectDetection) {
            return Err(anyhow!("{} detector cannot run object detection", primary.name()));
        }

        let strategy: Box<dyn Strategy> = match kind {
            StrategyKind::Tracking => {
                if !primary.supports(DetectionCapability::Tracking) {
                    return Err(anyhow!(
                        "tracking mode needs a tracking detector, {} does not track",
                        primary.name()
                    ));
                }
                Box::new(TrackingStrategy::new(primary, settings))
            }
            StrategyKind::Inspection => {
                let classifier =
                    classifier.ok_or_else(|| anyhow!("inspection mode needs a classifier"))?;
                let defect =
                    defect.ok_or_else(|| anyhow!("inspection mode needs a defect detector"))?;
                Box::new(InspectionStrategy::new(primary, classifier, defect, settings))
            }
            StrategyKind::Summary => Box::new(SummaryStrategy::new(primary, settings)),
        };
        Ok(Self::with_strategy(strategy))
    }

    pub fn with_strategy(strategy: Box<dyn Strategy>) -> Self {
        Self { strategy }
    }

    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    /// Resets strategy state and puts the store into `running_<strategy>`.
    pub fn begin(&mut self, store: &DetectionStateStore) {
        self.strategy.begin();
        store.begin_session(self.strategy.kind());
        log::info!("pipeline running {} strategy", self.strategy.kind());
    }

    /// Processes one frame.
    ///
    /// Detector failures skip the frame and are recorded in the store. Any
    /// other failure is returned and ends the session.
    pub fn process(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<FrameOutcome> {
        match self.strategy.process(frame, store) {
            Ok(()) => Ok(FrameOutcome::Processed),
            Err(err) if PipelineError::classify(&err) == FailureClass::Detector => {
                let message = format!("frame {} skipped: {:#}", frame.sequence, err);
                log::warn!("{}", message);
                store.record_skipped(message);
                Ok(FrameOutcome::Skipped)
            }
            Err(err) => Err(err),
        }
    }
}

/// Runs `detector` and drops boxes below `floor`.
///
/// Any inference error is a `Detector` failure, whatever the backend raised.
pub(crate) fn infer_above(detector: &mut dyn Detector, image: &RgbImage, floor: f32) -> Result<Vec<DetectionBox>> {
    let mut boxes = detector
        .infer(image)
        .map_err(|err| PipelineError::detector(format!("{} inference failed: {:#}", detector.name(), err)))?;
    boxes.retain(|det| det.confidence >= floor);
    Ok(boxes)
}
