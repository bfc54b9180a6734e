use anyhow::Result;

use super::{infer_above, PipelineSettings, Strategy, StrategyKind};
use crate::annotate::{self, GREEN, WHITE};
use crate::detect::Detector;
use crate::frame::Frame;
use crate::state::{summarize, AnnotatedFrame, DetectionStateStore, Payload};

/// Per-frame class counts with no identity across frames.
///
/// Suited to hosted detectors, which give no stable ids between calls. The
/// payload is rebuilt from scratch on every frame.
pub struct SummaryStrategy {
    detector: Box<dyn Detector>,
    settings: PipelineSettings,
}

impl SummaryStrategy {
    pub fn new(detector: Box<dyn Detector>, settings: PipelineSettings) -> Self {
        Self { detector, settings }
    }
}

impl Strategy for SummaryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Summary
    }

    fn process(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<()> {
        let boxes = infer_above(
            self.detector.as_mut(),
            frame.image(),
            self.settings.coarse_confidence,
        )?;

        let mut canvas = frame.to_canvas();
        for det in &boxes {
            annotate::draw_detection(&mut canvas, det, &annotate::detection_label(det), GREEN);
        }
        let summary = summarize(&boxes);
        for (line, (class, stats)) in summary.iter().enumerate() {
            let text = format!("{}: {} ({:.2})", class, stats.count, stats.average_confidence);
            annotate::draw_banner(&mut canvas, line, &text, WHITE);
        }

        store.write(
            Payload::Summary(summary),
            AnnotatedFrame::new(canvas, frame.sequence),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{DetectionBox, ScriptedDetector};
    use crate::state::Status;
    use image::RgbImage;

    #[test]
    fn each_frame_replaces_the_summary() {
        let detector = ScriptedDetector::frames(vec![
            vec![
                DetectionBox::new("crack", 0.8, 1, 1, 10, 10),
                DetectionBox::new("crack", 0.6, 12, 12, 20, 20),
            ],
            vec![DetectionBox::new("stain", 0.5, 1, 1, 10, 10)],
        ]);
        let mut strategy = SummaryStrategy::new(Box::new(detector), PipelineSettings::default());
        let store = DetectionStateStore::new();
        store.begin_session(StrategyKind::Summary);

        strategy.process(&Frame::new(RgbImage::new(32, 32), 1), &store).unwrap();
        match store.snapshot().detections {
            Payload::Summary(summary) => {
                assert_eq!(summary["crack"].count, 2);
                assert!((summary["crack"].average_confidence - 0.7).abs() < 1e-6);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        strategy.process(&Frame::new(RgbImage::new(32, 32), 2), &store).unwrap();
        let (snapshot, frame) = store.read();
        assert_eq!(snapshot.status, Status::Success);
        assert_eq!(frame.sequence, 2);
        match snapshot.detections {
            Payload::Summary(summary) => {
                assert!(!summary.contains_key("crack"));
                assert_eq!(summary["stain"].count, 1);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn overlays_are_drawn_on_a_copy() {
        let detector = ScriptedDetector::repeating(vec![DetectionBox::new("crack", 0.8, 2, 20, 20, 30)]);
        let mut strategy = SummaryStrategy::new(Box::new(detector), PipelineSettings::default());
        let store = DetectionStateStore::new();
        let frame = Frame::new(RgbImage::new(32, 32), 1);
        strategy.process(&frame, &store).unwrap();

        assert_eq!(frame.image().get_pixel(2, 20), &image::Rgb([0, 0, 0]));
        assert_eq!(store.annotated_frame().image().get_pixel(2, 20), &GREEN);
    }
}
