//! Detection state store.
//!
//! One `DetectionStateStore` is shared (behind an `Arc`) between the single
//! ingestion thread that writes it and any number of readers: the poll API,
//! a display loop, tests. A single mutex guards the snapshot and the
//! annotated frame together, so a reader always sees a status, payload and
//! frame that came from the same write.
//!
//! The lock is held only for the copy-in or copy-out itself. Detection,
//! drawing and JPEG encoding all happen before a write or after a read.

mod inspection;
mod snapshot;
mod tracks;

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use crate::annotate;
use crate::detect::{Classification, DetectionBox};
use crate::frame::{encode_jpeg, epoch_millis};
use crate::pipeline::StrategyKind;

pub use inspection::{InspectionPhase, InspectionSession};
pub use snapshot::{summarize, ClassStats, ClassSummary, DetectionStateSnapshot, Payload, Status};
pub use tracks::{TrackObservation, TrackRegistry, TrackedObject};

pub const PLACEHOLDER_WIDTH: u32 = 1280;
pub const PLACEHOLDER_HEIGHT: u32 = 720;
pub const PLACEHOLDER_MESSAGE: &str = "STARTING UP...";

/// The most recent frame with overlays drawn.
///
/// The pixels sit behind an `Arc` and are never mutated after construction;
/// a new write swaps in a new `AnnotatedFrame`. Readers therefore hold a
/// stable copy no matter what the writer does next.
#[derive(Clone, Debug)]
pub struct AnnotatedFrame {
    image: Arc<RgbImage>,
    /// Sequence of the source frame, 0 for the placeholder.
    pub sequence: u64,
}

impl AnnotatedFrame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
        }
    }

    pub fn placeholder() -> Self {
        Self::new(
            annotate::placeholder(PLACEHOLDER_WIDTH, PLACEHOLDER_HEIGHT, PLACEHOLDER_MESSAGE),
            0,
        )
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Owned pixel copy.
    pub fn to_image(&self) -> RgbImage {
        self.image.as_ref().clone()
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

struct StoreState {
    snapshot: DetectionStateSnapshot,
    frame: AnnotatedFrame,
}

pub struct DetectionStateStore {
    inner: Mutex<StoreState>,
}

impl DetectionStateStore {
    pub fn new() -> Self {
        Self::with_placeholder(AnnotatedFrame::placeholder())
    }

    pub fn with_placeholder(frame: AnnotatedFrame) -> Self {
        Self {
            inner: Mutex::new(StoreState {
                snapshot: DetectionStateSnapshot::default(),
                frame,
            }),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // Writers never leave the state half-updated, so a poisoned lock still
    // holds a consistent value.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot and frame from the same write.
    pub fn read(&self) -> (DetectionStateSnapshot, AnnotatedFrame) {
        let guard = self.lock();
        (guard.snapshot.clone(), guard.frame.clone())
    }

    pub fn snapshot(&self) -> DetectionStateSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn annotated_frame(&self) -> AnnotatedFrame {
        self.lock().frame.clone()
    }

    pub fn status(&self) -> Status {
        self.lock().snapshot.status
    }

    /// Replaces the displayed frame without touching the snapshot.
    pub fn show_placeholder(&self, frame: AnnotatedFrame) {
        self.lock().frame = frame;
    }

    /// Starts a session: empty payload for `kind`, counters reset.
    pub fn begin_session(&self, kind: StrategyKind) {
        let mut guard = self.lock();
        guard.snapshot = DetectionStateSnapshot {
            status: Status::Running(kind),
            strategy: Some(kind),
            detections: Payload::empty_for(kind),
            updated_at_ms: Some(now_ms()),
            ..DetectionStateSnapshot::default()
        };
    }

    /// Replaces payload and frame in one step.
    pub fn write(&self, payload: Payload, frame: AnnotatedFrame) {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.snapshot.detections = payload;
        mark_success(&mut state.snapshot);
        state.frame = frame;
    }

    /// Replaces the frame only; the payload stays as it is.
    pub fn write_frame(&self, frame: AnnotatedFrame) {
        let mut guard = self.lock();
        let state = &mut *guard;
        mark_success(&mut state.snapshot);
        state.frame = frame;
    }

    /// Which of `ids` the registry has not seen yet.
    pub fn unseen_tracks(&self, ids: &[u64]) -> Result<Vec<u64>> {
        let guard = self.lock();
        let registry = match &guard.snapshot.detections {
            Payload::Tracks(registry) => registry,
            _ => return Err(anyhow!("store is not in a tracking session")),
        };
        Ok(ids.iter().copied().filter(|id| !registry.contains(*id)).collect())
    }

    /// Which of `ids` still need a snapshot: unseen ones, plus tracks whose
    /// earlier boxes all cropped to nothing.
    pub fn tracks_needing_snapshot(&self, ids: &[u64]) -> Result<Vec<u64>> {
        let guard = self.lock();
        let registry = match &guard.snapshot.detections {
            Payload::Tracks(registry) => registry,
            _ => return Err(anyhow!("store is not in a tracking session")),
        };
        Ok(ids.iter().copied().filter(|id| registry.needs_snapshot(*id)).collect())
    }

    /// Merges one frame's observations into the registry.
    ///
    /// Observations are applied in order, so when one id appears twice the
    /// last box wins for the current fields.
    pub fn upsert_tracks(
        &self,
        observations: Vec<TrackObservation>,
        in_frame: usize,
        frame: AnnotatedFrame,
    ) -> Result<usize> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let registry = match &mut state.snapshot.detections {
            Payload::Tracks(registry) => registry,
            _ => return Err(anyhow!("store is not in a tracking session")),
        };
        let mut created = 0;
        for obs in observations {
            if registry.observe(obs) {
                created += 1;
            }
        }
        registry.finish_frame(in_frame);
        mark_success(&mut state.snapshot);
        state.frame = frame;
        Ok(created)
    }

    /// Moves the inspection forward and swaps in the frame that did it.
    ///
    /// Phase, subject and frame change under one lock, so no reader sees the
    /// new phase next to the previous frame. Backward moves are rejected and
    /// leave the store untouched.
    pub fn set_phase(
        &self,
        phase: InspectionPhase,
        subject: Option<Classification>,
        frame: AnnotatedFrame,
    ) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let session = match &mut state.snapshot.detections {
            Payload::Inspection(session) => session,
            _ => return Err(anyhow!("store is not in an inspection session")),
        };
        match (session.phase, phase) {
            (current, wanted) if current == wanted => {}
            (InspectionPhase::ClassifyingSubject, InspectionPhase::DetectingDefects) => {
                let subject =
                    subject.ok_or_else(|| anyhow!("entering defect detection needs a subject"))?;
                session.advance(subject.label, subject.confidence_pct)?;
            }
            (current, wanted) => {
                return Err(anyhow!(
                    "inspection phase cannot move from {:?} to {:?}",
                    current,
                    wanted
                ))
            }
        }
        mark_success(&mut state.snapshot);
        state.frame = frame;
        Ok(())
    }

    pub fn replace_defects(&self, defects: Vec<DetectionBox>, frame: AnnotatedFrame) -> Result<()> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let session = match &mut state.snapshot.detections {
            Payload::Inspection(session) => session,
            _ => return Err(anyhow!("store is not in an inspection session")),
        };
        session.replace_defects(defects)?;
        mark_success(&mut state.snapshot);
        state.frame = frame;
        Ok(())
    }

    /// Notes a frame dropped after a detector failure. Status is unchanged.
    pub fn record_skipped(&self, message: impl Into<String>) {
        let mut guard = self.lock();
        guard.snapshot.frames_skipped += 1;
        guard.snapshot.message = Some(message.into());
        guard.snapshot.updated_at_ms = Some(now_ms());
    }

    /// Enters the error state. The last good frame stays on display.
    pub fn set_error(&self, message: impl Into<String>) {
        let mut guard = self.lock();
        guard.snapshot.status = Status::Error;
        guard.snapshot.message = Some(message.into());
        guard.snapshot.updated_at_ms = Some(now_ms());
    }
}

impl Default for DetectionStateStore {
    fn default() -> Self {
        Self::new()
    }
}

fn mark_success(snapshot: &mut DetectionStateSnapshot) {
    snapshot.status = Status::Success;
    snapshot.message = None;
    snapshot.frames_processed += 1;
    snapshot.updated_at_ms = Some(now_ms());
}

fn now_ms() -> u64 {
    epoch_millis(SystemTime::now())
}
