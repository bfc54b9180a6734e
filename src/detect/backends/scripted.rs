use anyhow::Result;
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::detect::backend::{Classifier, DetectionCapability, Detector};
use crate::detect::result::{Classification, DetectionBox};
use crate::error::PipelineError;

/// One scripted response.
#[derive(Clone, Debug)]
pub enum ScriptStep {
    Boxes(Vec<DetectionBox>),
    Fail(String),
}

/// Detector that replays a fixed script, one step per call.
///
/// Once the script is exhausted the `tail` step repeats forever. Used by the
/// test-suite and by `voxeld` when no model is wired in.
pub struct ScriptedDetector {
    steps: VecDeque<ScriptStep>,
    tail: ScriptStep,
    tracking: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn empty() -> Self {
        Self::repeating(Vec::new())
    }

    /// Returns the same boxes on every call.
    pub fn repeating(boxes: Vec<DetectionBox>) -> Self {
        Self::sequence(Vec::new(), ScriptStep::Boxes(boxes))
    }

    pub fn sequence(steps: Vec<ScriptStep>, tail: ScriptStep) -> Self {
        let tracking = steps
            .iter()
            .chain(std::iter::once(&tail))
            .any(|step| matches!(step, ScriptStep::Boxes(boxes) if boxes.iter().any(|b| b.track_id.is_some())));
        Self {
            steps: steps.into(),
            tail,
            tracking,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Per-frame box lists, then empty frames.
    pub fn frames(frames: Vec<Vec<DetectionBox>>) -> Self {
        Self::sequence(
            frames.into_iter().map(ScriptStep::Boxes).collect(),
            ScriptStep::Boxes(Vec::new()),
        )
    }

    /// Shared call counter, readable after the detector moved into a pipeline.
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, capability: DetectionCapability) -> bool {
        match capability {
            DetectionCapability::ObjectDetection => true,
            DetectionCapability::Tracking => self.tracking,
        }
    }

    fn infer(&mut self, _image: &RgbImage) -> Result<Vec<DetectionBox>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.pop_front().unwrap_or_else(|| self.tail.clone());
        match step {
            ScriptStep::Boxes(boxes) => Ok(boxes),
            ScriptStep::Fail(msg) => Err(PipelineError::detector(msg)),
        }
    }
}

/// Classifier that always answers with the same label.
pub struct ScriptedClassifier {
    answer: Classification,
    calls: Arc<AtomicUsize>,
}

impl ScriptedClassifier {
    pub fn new(label: impl Into<String>, confidence_pct: f32) -> Self {
        Self {
            answer: Classification {
                label: label.into(),
                confidence_pct,
            },
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Classifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn classify(&mut self, _crop: &RgbImage) -> Result<Classification> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.answer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureClass;

    #[test]
    fn script_then_tail() {
        let crack = DetectionBox::new("crack", 0.8, 0, 0, 4, 4);
        let mut det = ScriptedDetector::sequence(
            vec![ScriptStep::Fail("warming".into()), ScriptStep::Boxes(vec![crack.clone()])],
            ScriptStep::Boxes(Vec::new()),
        );
        let image = RgbImage::new(8, 8);

        let err = det.infer(&image).unwrap_err();
        assert_eq!(PipelineError::classify(&err), FailureClass::Detector);
        assert_eq!(det.infer(&image).unwrap(), vec![crack]);
        assert!(det.infer(&image).unwrap().is_empty());
        assert!(det.infer(&image).unwrap().is_empty());
        assert_eq!(det.call_counter().load(Ordering::SeqCst), 4);
    }

    #[test]
    fn tracking_support_follows_the_script() {
        let plain = ScriptedDetector::repeating(vec![DetectionBox::new("car", 0.9, 0, 0, 2, 2)]);
        assert!(!plain.supports(DetectionCapability::Tracking));
        let tracked = ScriptedDetector::repeating(vec![
            DetectionBox::new("car", 0.9, 0, 0, 2, 2).with_track_id(3),
        ]);
        assert!(tracked.supports(DetectionCapability::Tracking));
    }
}
