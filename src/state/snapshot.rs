use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use super::inspection::InspectionSession;
use super::tracks::TrackRegistry;
use crate::pipeline::StrategyKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Initializing,
    Running(StrategyKind),
    Success,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Initializing => "initializing",
            Status::Running(StrategyKind::Tracking) => "running_tracking",
            Status::Running(StrategyKind::Inspection) => "running_inspection",
            Status::Running(StrategyKind::Summary) => "running_summary",
            Status::Success => "success",
            Status::Error => "error",
        }
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ClassStats {
    pub count: u32,
    pub average_confidence: f32,
}

/// Per-class counts for one frame.
pub type ClassSummary = BTreeMap<String, ClassStats>;

/// Strategy-specific part of the snapshot.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Empty,
    Tracks(TrackRegistry),
    Inspection(InspectionSession),
    Summary(ClassSummary),
}

impl Payload {
    /// The empty payload a strategy starts its session with.
    pub fn empty_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::Tracking => Payload::Tracks(TrackRegistry::new()),
            StrategyKind::Inspection => Payload::Inspection(InspectionSession::default()),
            StrategyKind::Summary => Payload::Summary(ClassSummary::new()),
        }
    }
}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Payload::Empty => serializer.serialize_map(Some(0))?.end(),
            Payload::Tracks(registry) => registry.serialize(serializer),
            Payload::Inspection(session) => session.serialize(serializer),
            Payload::Summary(summary) => summary.serialize(serializer),
        }
    }
}

/// Externally visible aggregate, as returned by the poll endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DetectionStateSnapshot {
    pub status: Status,
    pub strategy: Option<StrategyKind>,
    pub detections: Payload,
    pub message: Option<String>,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    /// Wall-clock time of the last write, for staleness checks.
    pub updated_at_ms: Option<u64>,
}

impl Default for DetectionStateSnapshot {
    fn default() -> Self {
        Self {
            status: Status::Initializing,
            strategy: None,
            detections: Payload::Empty,
            message: None,
            frames_processed: 0,
            frames_skipped: 0,
            updated_at_ms: None,
        }
    }
}

/// Builds the per-class summary for one frame's boxes.
pub fn summarize<'a, I>(boxes: I) -> ClassSummary
where
    I: IntoIterator<Item = &'a crate::detect::DetectionBox>,
{
    let mut totals: BTreeMap<String, (u32, f32)> = BTreeMap::new();
    for det in boxes {
        let entry = totals.entry(det.class_name.clone()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += det.confidence;
    }
    totals
        .into_iter()
        .map(|(class, (count, total))| {
            (
                class,
                ClassStats {
                    count,
                    average_confidence: total / count as f32,
                },
            )
        })
        .collect()
}
