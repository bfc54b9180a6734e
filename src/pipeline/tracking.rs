use anyhow::Result;
use std::collections::HashSet;
use std::sync::Arc;

use super::{infer_above, PipelineSettings, Strategy, StrategyKind};
use crate::annotate::{self, AMBER, GREEN, WHITE};
use crate::detect::{DetectionBox, Detector};
use crate::frame::{encode_jpeg, Frame};
use crate::state::{AnnotatedFrame, DetectionStateStore, TrackObservation};

/// Track registry strategy.
///
/// Each track id moves `UNSEEN -> SEEN` exactly once. The first box for an
/// id that crops to a non-empty region is kept as the track's snapshot;
/// later boxes only move the last-seen time and confidence. Boxes without an id are drawn but not
/// registered.
pub struct TrackingStrategy {
    detector: Box<dyn Detector>,
    settings: PipelineSettings,
}

impl TrackingStrategy {
    pub fn new(detector: Box<dyn Detector>, settings: PipelineSettings) -> Self {
        Self { detector, settings }
    }

    fn snapshot_of(&self, frame: &Frame, det: &DetectionBox) -> Result<Option<Arc<[u8]>>> {
        match frame.crop(det) {
            Some(crop) => Ok(Some(Arc::from(encode_jpeg(&crop, self.settings.jpeg_quality)?))),
            None => Ok(None),
        }
    }
}

impl Strategy for TrackingStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Tracking
    }

    fn process(&mut self, frame: &Frame, store: &DetectionStateStore) -> Result<()> {
        let boxes = infer_above(
            self.detector.as_mut(),
            frame.image(),
            self.settings.coarse_confidence,
        )?;

        let ids: Vec<u64> = boxes.iter().filter_map(|det| det.track_id).collect();
        let unseen: HashSet<u64> = store.unseen_tracks(&ids)?.into_iter().collect();
        let unsnapped: HashSet<u64> = store.tracks_needing_snapshot(&ids)?.into_iter().collect();
        let seen_at_ms = frame.received_at_ms();

        let mut canvas = frame.to_canvas();
        let mut observations = Vec::with_capacity(ids.len());
        let mut snapped = HashSet::new();
        let mut created = HashSet::new();
        let mut in_frame = HashSet::new();

        for det in &boxes {
            let Some(track_id) = det.track_id else {
                annotate::draw_detection(&mut canvas, det, &annotate::detection_label(det), WHITE);
                continue;
            };
            in_frame.insert(track_id);

            let is_new = unseen.contains(&track_id);
            if is_new {
                created.insert(track_id);
            }
            let snapshot = if unsnapped.contains(&track_id) && !snapped.contains(&track_id) {
                self.snapshot_of(frame, det)?
            } else {
                None
            };
            if snapshot.is_some() {
                snapped.insert(track_id);
            }
            let label = format!("#{} {}: {:.2}", track_id, det.class_name, det.confidence);
            annotate::draw_detection(&mut canvas, det, &label, if is_new { AMBER } else { GREEN });

            observations.push(TrackObservation {
                track_id,
                class_name: det.class_name.clone(),
                confidence: det.confidence,
                seen_at_ms,
                snapshot,
            });
        }

        let in_frame = in_frame.len();
        let created = created.len();
        if created > 0 {
            log::debug!("frame {}: {} new track(s)", frame.sequence, created);
        }
        annotate::draw_banner(&mut canvas, 0, &format!("IN FRAME: {}", in_frame), WHITE);
        if created > 0 {
            annotate::draw_banner(&mut canvas, 1, &format!("NEW: {}", created), AMBER);
        }

        store.upsert_tracks(
            observations,
            in_frame,
            AnnotatedFrame::new(canvas, frame.sequence),
        )?;
        Ok(())
    }
}
