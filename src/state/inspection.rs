use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::detect::DetectionBox;

/// Phases only move forward within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InspectionPhase {
    ClassifyingSubject,
    DetectingDefects,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InspectionSession {
    pub phase: InspectionPhase,
    pub subject_label: Option<String>,
    /// Classifier confidence, in percent.
    pub subject_confidence: f32,
    pub defect_list: Vec<DetectionBox>,
}

impl Default for InspectionSession {
    fn default() -> Self {
        Self {
            phase: InspectionPhase::ClassifyingSubject,
            subject_label: None,
            subject_confidence: 0.0,
            defect_list: Vec::new(),
        }
    }
}

impl InspectionSession {
    /// Records the subject and enters `DetectingDefects`.
    pub fn advance(&mut self, label: String, confidence_pct: f32) -> Result<()> {
        if self.phase != InspectionPhase::ClassifyingSubject {
            return Err(anyhow!("inspection subject already classified"));
        }
        self.subject_label = Some(label);
        self.subject_confidence = confidence_pct;
        self.phase = InspectionPhase::DetectingDefects;
        Ok(())
    }

    /// Replaces the defect list wholesale.
    pub fn replace_defects(&mut self, defects: Vec<DetectionBox>) -> Result<()> {
        if self.phase != InspectionPhase::DetectingDefects {
            return Err(anyhow!("defects reported before the subject was classified"));
        }
        self.defect_list = defects;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_moves_forward_once() {
        let mut session = InspectionSession::default();
        session.advance("sedan".into(), 91.0).expect("advance");
        assert_eq!(session.phase, InspectionPhase::DetectingDefects);
        assert!(session.advance("coupe".into(), 99.0).is_err());
        assert_eq!(session.subject_label.as_deref(), Some("sedan"));
    }

    #[test]
    fn defects_replace_not_accumulate() {
        let mut session = InspectionSession::default();
        assert!(session.replace_defects(vec![]).is_err());
        session.advance("sedan".into(), 91.0).unwrap();
        let dent = DetectionBox::new("dent", 0.7, 0, 0, 5, 5);
        let scratch = DetectionBox::new("scratch", 0.6, 1, 1, 3, 3);
        session.replace_defects(vec![dent.clone(), scratch]).unwrap();
        session.replace_defects(vec![dent.clone()]).unwrap();
        assert_eq!(session.defect_list, vec![dent]);
    }
}
