//! Persistent identities for the tracking strategy.
//!
//! The registry only grows: a track is created the first time its id is
//! observed and is never removed while the session lasts. The owning store
//! resets it at session start.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackedObject {
    pub track_id: u64,
    pub class_name: String,
    pub first_seen_ms: u64,
    pub last_seen_ms: u64,
    pub last_confidence: f32,
    /// JPEG crop from the first sighting with a usable box. Written once;
    /// `None` (JSON `null`) while every box so far has cropped to nothing.
    #[serde(rename = "snapshot_jpeg", serialize_with = "serialize_base64")]
    pub first_seen_snapshot: Option<Arc<[u8]>>,
}

/// One box-with-identity from the current frame.
#[derive(Clone, Debug)]
pub struct TrackObservation {
    pub track_id: u64,
    pub class_name: String,
    pub confidence: f32,
    pub seen_at_ms: u64,
    /// Encoded crop, supplied only while the track has no snapshot yet.
    pub snapshot: Option<Arc<[u8]>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TrackRegistry {
    /// Distinct ids seen since the session started.
    pub total_unique: usize,
    /// Distinct ids present in the last processed frame.
    pub in_frame: usize,
    pub objects: BTreeMap<u64, TrackedObject>,
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, track_id: u64) -> bool {
        self.objects.contains_key(&track_id)
    }

    /// True for unknown ids and for tracks still waiting for a snapshot.
    pub fn needs_snapshot(&self, track_id: u64) -> bool {
        self.objects
            .get(&track_id)
            .map_or(true, |track| track.first_seen_snapshot.is_none())
    }

    pub fn get(&self, track_id: u64) -> Option<&TrackedObject> {
        self.objects.get(&track_id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Applies one observation. Returns true when it created the track.
    ///
    /// Later observations of a known id only move `last_seen_ms` and
    /// `last_confidence`; the class stays as first recorded and a snapshot
    /// is only filled in if the track has none.
    pub fn observe(&mut self, obs: TrackObservation) -> bool {
        if let Some(existing) = self.objects.get_mut(&obs.track_id) {
            existing.last_seen_ms = obs.seen_at_ms;
            existing.last_confidence = obs.confidence;
            if existing.first_seen_snapshot.is_none() {
                existing.first_seen_snapshot = obs.snapshot;
            }
            return false;
        }
        self.objects.insert(
            obs.track_id,
            TrackedObject {
                track_id: obs.track_id,
                class_name: obs.class_name,
                first_seen_ms: obs.seen_at_ms,
                last_seen_ms: obs.seen_at_ms,
                last_confidence: obs.confidence,
                first_seen_snapshot: obs.snapshot,
            },
        );
        true
    }

    /// Recomputes both counters after a frame.
    pub fn finish_frame(&mut self, in_frame: usize) {
        self.total_unique = self.objects.len();
        self.in_frame = in_frame;
    }
}

fn serialize_base64<S: Serializer>(bytes: &Option<Arc<[u8]>>, serializer: S) -> Result<S::Ok, S::Error> {
    match bytes {
        Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
        None => serializer.serialize_none(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: u64, conf: f32, at: u64, snapshot: Option<&[u8]>) -> TrackObservation {
        TrackObservation {
            track_id: id,
            class_name: "person".into(),
            confidence: conf,
            seen_at_ms: at,
            snapshot: snapshot.map(Arc::from),
        }
    }

    #[test]
    fn first_observation_creates_later_ones_update() {
        let mut registry = TrackRegistry::new();
        assert!(registry.observe(obs(7, 0.5, 100, Some(b"jpeg-1"))));
        assert!(!registry.observe(obs(7, 0.9, 250, Some(b"jpeg-2"))));

        let track = registry.get(7).expect("track");
        assert_eq!(track.first_seen_ms, 100);
        assert_eq!(track.last_seen_ms, 250);
        assert_eq!(track.last_confidence, 0.9);
        assert_eq!(track.first_seen_snapshot.as_deref(), Some(&b"jpeg-1"[..]));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn counters_track_unique_and_current() {
        let mut registry = TrackRegistry::new();
        registry.observe(obs(1, 0.5, 1, None));
        registry.observe(obs(2, 0.5, 1, None));
        registry.finish_frame(2);
        registry.observe(obs(2, 0.6, 2, None));
        registry.finish_frame(1);
        assert_eq!(registry.total_unique, 2);
        assert_eq!(registry.in_frame, 1);
    }

    #[test]
    fn snapshot_serializes_as_base64() {
        let mut registry = TrackRegistry::new();
        registry.observe(obs(3, 0.5, 1, Some(b"abc")));
        registry.finish_frame(1);
        let json = serde_json::to_value(&registry).expect("json");
        assert_eq!(json["objects"]["3"]["snapshot_jpeg"], "YWJj");
        assert_eq!(json["total_unique"], 1);
    }

    #[test]
    fn missing_snapshot_is_filled_once() {
        let mut registry = TrackRegistry::new();
        registry.observe(obs(4, 0.5, 1, None));
        assert!(registry.needs_snapshot(4));
        let json = serde_json::to_value(&registry).expect("json");
        assert!(json["objects"]["4"]["snapshot_jpeg"].is_null());

        registry.observe(obs(4, 0.6, 2, Some(b"late")));
        registry.observe(obs(4, 0.7, 3, Some(b"later")));
        assert!(!registry.needs_snapshot(4));
        let track = registry.get(4).unwrap();
        assert_eq!(track.first_seen_snapshot.as_deref(), Some(&b"late"[..]));
        assert_eq!(track.first_seen_ms, 1);
    }
}
