use anyhow::Result;

use super::{infer_above, PipelineSettings, Strategy, StrategyKind};
use crate::annotate::{self, AMBER, GREEN, RED, WHITE};
use crate::detect::{Classifier, Detector, LazyDetector};
use crate::error::PipelineError;
use crate::frame::Frame;
use crate::state::{AnnotatedFrame, DetectionStateStore, InspectionPhase};

/// Two-phase inspection: classify the subject once, then look for defects.
///
/// `CLASSIFYING_SUBJECT` runs the coarse subject detector. The first box of
/// the subject class above the trusted threshold is cropped and classified,
/// the defect detector is loaded, and the phase moves to
/// `DETECTING_DEFECTS` for the rest of the session. Defect detection starts
/// with the next frame.
pub struct InspectionStrategy {
    subject: Box<dyn Detector>,
    classifier: Box<dyn Classifier>,
    defects: LazyDetector,
    settings: PipelineSettings,
    phase: InspectionPhase,
    subject_label: Option<String>,
}

impl InspectionStrategy {
    pub fn new(
        subject: Box<dyn Detector>,
        classifier: Box<dyn Classifier>,
        defects: LazyDetector,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            subject,
            classifier,
            defects,
            settings,
            phase: InspectionPhase::ClassifyingSubject,
            subject_label: None,
        }
    }

    pub fn phase(&self) -> InspectionPhase {
        self.phase
    }

    fn classify_subject(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<()> {
        let boxes = infer_above(
            self.subject.as_mut(),
            frame.image(),
            self.settings.coarse_confidence,
        )?;

        let mut canvas = frame.to_canvas();
        for det in &boxes {
            annotate::draw_detection(&mut canvas, det, &annotate::detection_label(det), AMBER);
        }
        annotate::draw_banner(&mut canvas, 0, "CLASSIFYING SUBJECT", WHITE);

        let candidate = boxes.iter().find(|det| {
            det.class_name == self.settings.subject_class
                && det.confidence > self.settings.trusted_confidence
        });
        let Some(candidate) = candidate else {
            store.write_frame(AnnotatedFrame::new(canvas, frame.sequence));
            return Ok(());
        };

        let Some(crop) = frame.crop(candidate) else {
            log::debug!(
                "frame {}: subject box ({}, {})-({}, {}) has no area",
                frame.sequence,
                candidate.x1,
                candidate.y1,
                candidate.x2,
                candidate.y2
            );
            store.write_frame(AnnotatedFrame::new(canvas, frame.sequence));
            return Ok(());
        };

        let subject = self.classifier.classify(&crop).map_err(|err| {
            PipelineError::detector(format!("{} classification failed: {:#}", self.classifier.name(), err))
        })?;
        self.defects
            .get()
            .map_err(|err| PipelineError::detector(format!("defect detector unavailable: {:#}", err)))?;

        log::info!(
            "subject classified as {} ({:.1}%), switching to defect detection",
            subject.label,
            subject.confidence_pct
        );
        let label = format!("{} {:.0}%", subject.label, subject.confidence_pct);
        annotate::draw_detection(&mut canvas, candidate, &label, GREEN);

        store.set_phase(
            InspectionPhase::DetectingDefects,
            Some(subject),
            AnnotatedFrame::new(canvas, frame.sequence),
        )?;
        self.phase = InspectionPhase::DetectingDefects;
        self.subject_label = Some(label);
        Ok(())
    }

    fn detect_defects(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<()> {
        let detector = self.defects.get()?;
        let defects = infer_above(detector, frame.image(), self.settings.coarse_confidence)?;

        let mut canvas = frame.to_canvas();
        for det in &defects {
            annotate::draw_detection(&mut canvas, det, &annotate::detection_label(det), RED);
        }
        if let Some(label) = &self.subject_label {
            annotate::draw_banner(&mut canvas, 0, label, GREEN);
        }
        annotate::draw_banner(&mut canvas, 1, &format!("DEFECTS: {}", defects.len()), RED);

        store.replace_defects(defects, AnnotatedFrame::new(canvas, frame.sequence))
    }
}

impl Strategy for InspectionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Inspection
    }

    fn begin(&mut self) {
        self.phase = InspectionPhase::ClassifyingSubject;
        self.subject_label = None;
    }

    fn process(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<()> {
        match self.phase {
            InspectionPhase::ClassifyingSubject => self.classify_subject(frame, store),
            InspectionPhase::DetectingDefects => self.detect_defects(frame, store),
        }
    }
}
