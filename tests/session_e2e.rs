//! Full sessions over loopback: a replay device pushes PNG frames to the
//! ingestion worker, which runs them through a strategy into the store.

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::json;

use voxel_vision::detect::{DetectionBox, Detector, LazyDetector, ScriptedClassifier, ScriptedDetector};
use voxel_vision::device::{PassiveDevice, ReplayDevice, ReplayOptions};
use voxel_vision::ingest::DEFAULT_MAX_FRAME_BYTES;
use voxel_vision::state::{InspectionPhase, Payload, Status};
use voxel_vision::{
    DetectionStateStore, DetectorSet, Dispatcher, ExitReason, IngestWorker, PipelineSettings, SessionConfig,
    StrategyKind, WorkerConfig,
};

fn png_frame(shade: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(64, 48, Rgb([shade, 80, 120]));
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

fn frames(count: usize) -> Vec<Vec<u8>> {
    (0..count).map(|i| png_frame((i * 20) as u8)).collect()
}

fn worker_config(accept_timeout: Duration) -> WorkerConfig {
    WorkerConfig {
        session: SessionConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            stream_port: 0,
            accept_timeout,
            ip_probe_addr: "127.0.0.1:9".to_string(),
            advertise_ip: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        },
        max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        throughput_interval: Duration::from_secs(5),
    }
}

fn back_to_back() -> ReplayOptions {
    ReplayOptions {
        frame_interval: Duration::ZERO,
        ..ReplayOptions::default()
    }
}

fn summary_dispatcher(boxes: Vec<DetectionBox>) -> Dispatcher {
    Dispatcher::from_mode(
        StrategyKind::Summary,
        DetectorSet::new(Box::new(ScriptedDetector::repeating(boxes))),
        PipelineSettings::default(),
    )
    .expect("summary dispatcher")
}

#[test]
fn summary_session_publishes_last_frame_counts() {
    let options = ReplayOptions {
        frame_interval: Duration::from_millis(40),
        ..ReplayOptions::default()
    };
    let device = ReplayDevice::new("replay", frames(5), options);
    let probe = device.probe();
    let store = DetectionStateStore::shared();
    let dispatcher = summary_dispatcher(vec![
        DetectionBox::new("crack", 0.8, 4, 4, 30, 20),
        DetectionBox::new("stain", 0.2, 10, 10, 20, 20),
    ]);
    let expected = json!({"crack": {"count": 1, "average_confidence": 0.8}});

    let handle = IngestWorker::spawn(worker_config(Duration::from_secs(5)), Box::new(device), dispatcher, store.clone())
        .expect("spawn worker");

    let mut live_reads = 0u32;
    let mut counts_seen = std::collections::BTreeSet::new();
    while !handle.is_finished() {
        let (snapshot, _) = store.read();
        if snapshot.frames_processed >= 1 {
            assert_eq!(snapshot.status, Status::Success);
            let detections: serde_json::Value =
                serde_json::from_str(&serde_json::to_string(&snapshot.detections).unwrap()).unwrap();
            assert_eq!(detections, expected);
            live_reads += 1;
            counts_seen.insert(snapshot.frames_processed);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(live_reads > 0, "no snapshot observed while streaming");
    assert!(counts_seen.len() > 1, "reads covered only {:?}", counts_seen);

    let report = handle.join().expect("join worker");

    assert_eq!(report.exit, ExitReason::EndOfStream);
    assert_eq!(report.frames_decoded, 5);
    assert_eq!(report.frames_processed, 5);
    assert!(report.peer.is_some());

    let (snapshot, frame) = store.read();
    assert_eq!(snapshot.status, Status::Success);
    assert_eq!(snapshot.frames_processed, 5);
    let detections: serde_json::Value =
        serde_json::from_str(&serde_json::to_string(&snapshot.detections).unwrap()).unwrap();
    assert_eq!(detections, expected);
    assert_eq!(frame.image().dimensions(), (64, 48));

    assert_eq!(probe.connects.load(Ordering::SeqCst), 1);
    assert_eq!(probe.stream_requests.load(Ordering::SeqCst), 1);
    assert_eq!(probe.stream_stops.load(Ordering::SeqCst), 1);
    assert_eq!(probe.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(probe.frames_sent.load(Ordering::SeqCst), 5);
}

#[test]
fn tracking_session_registers_each_track_once() {
    let car = |id| DetectionBox::new("car", 0.9, 2, 2, 30, 30).with_track_id(id);
    let detector = ScriptedDetector::frames(vec![vec![car(1)], vec![car(1), car(2)], vec![car(2)]]);
    let dispatcher = Dispatcher::from_mode(
        StrategyKind::Tracking,
        DetectorSet::new(Box::new(detector)),
        PipelineSettings::default(),
    )
    .expect("tracking dispatcher");
    let device = ReplayDevice::new("replay", frames(3), back_to_back());
    let store = DetectionStateStore::shared();

    let report = IngestWorker::spawn(worker_config(Duration::from_secs(5)), Box::new(device), dispatcher, store.clone())
        .expect("spawn worker")
        .join()
        .expect("join worker");
    assert_eq!(report.exit, ExitReason::EndOfStream);

    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, Status::Success);
    let Payload::Tracks(registry) = snapshot.detections else {
        panic!("expected a track registry, got {:?}", snapshot.detections);
    };
    assert_eq!(registry.total_unique, 2);
    assert_eq!(registry.in_frame, 1);
    assert!(registry.objects[&1].first_seen_snapshot.is_some());
    assert!(registry.objects[&2].first_seen_ms >= registry.objects[&1].first_seen_ms);
}

#[test]
fn inspection_session_moves_to_defect_detection() {
    let subject = ScriptedDetector::frames(vec![vec![], vec![DetectionBox::new("car", 0.9, 4, 4, 40, 40)]]);
    let defect_boxes = vec![DetectionBox::new("dent", 0.7, 10, 10, 20, 20)];
    let detectors = DetectorSet::new(Box::new(subject))
        .with_classifier(Box::new(ScriptedClassifier::new("sedan", 92.0)))
        .with_defect(LazyDetector::new("defect", move || {
            Ok(Box::new(ScriptedDetector::repeating(defect_boxes)) as Box<dyn Detector>)
        }));
    let dispatcher =
        Dispatcher::from_mode(StrategyKind::Inspection, detectors, PipelineSettings::default()).expect("dispatcher");
    let device = ReplayDevice::new("replay", frames(4), back_to_back());
    let store = DetectionStateStore::shared();

    let report = IngestWorker::spawn(worker_config(Duration::from_secs(5)), Box::new(device), dispatcher, store.clone())
        .expect("spawn worker")
        .join()
        .expect("join worker");
    assert_eq!(report.exit, ExitReason::EndOfStream);
    assert_eq!(report.frames_processed, 4);

    let Payload::Inspection(session) = store.snapshot().detections else {
        panic!("expected an inspection session");
    };
    assert_eq!(session.phase, InspectionPhase::DetectingDefects);
    assert_eq!(session.subject_label.as_deref(), Some("sedan"));
    assert_eq!(session.defect_list.len(), 1);
    assert_eq!(session.defect_list[0].class_name, "dent");
}

#[test]
fn stop_ends_a_looping_session_and_tears_down() {
    let options = ReplayOptions {
        frame_interval: Duration::from_millis(10),
        looping: true,
        ..ReplayOptions::default()
    };
    let device = ReplayDevice::new("replay", frames(2), options);
    let probe = device.probe();
    let store = DetectionStateStore::shared();
    let handle = IngestWorker::spawn(
        worker_config(Duration::from_secs(5)),
        Box::new(device),
        summary_dispatcher(Vec::new()),
        store.clone(),
    )
    .expect("spawn worker");

    let deadline = Instant::now() + Duration::from_secs(10);
    while store.snapshot().frames_processed < 3 {
        assert!(Instant::now() < deadline, "no frames arrived");
        std::thread::sleep(Duration::from_millis(10));
    }

    let report = handle.stop().expect("stop worker");
    assert_eq!(report.exit, ExitReason::Stopped);
    assert!(report.frames_processed >= 3);
    assert_eq!(probe.stream_stops.load(Ordering::SeqCst), 1);
    assert_eq!(probe.disconnects.load(Ordering::SeqCst), 1);
}

#[test]
fn silent_device_times_out_into_error_status() {
    let store = DetectionStateStore::shared();
    let report = IngestWorker::spawn(
        worker_config(Duration::from_millis(200)),
        Box::new(PassiveDevice::new("silent")),
        summary_dispatcher(Vec::new()),
        store.clone(),
    )
    .expect("spawn worker")
    .join()
    .expect("join worker");

    assert!(matches!(report.exit, ExitReason::Failed(_)));
    assert_eq!(report.frames_decoded, 0);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.status, Status::Error);
    assert!(snapshot.message.is_some());
}

#[test]
fn corrupt_stream_fails_the_session() {
    let mut payloads = frames(2);
    payloads.insert(1, b"definitely not an image".to_vec());
    let device = ReplayDevice::new("replay", payloads, back_to_back());
    let store = Arc::new(DetectionStateStore::new());

    let report = IngestWorker::spawn(
        worker_config(Duration::from_secs(5)),
        Box::new(device),
        summary_dispatcher(Vec::new()),
        store.clone(),
    )
    .expect("spawn worker")
    .join()
    .expect("join worker");

    assert!(matches!(report.exit, ExitReason::Failed(_)));
    assert_eq!(report.frames_processed, 1);
    assert_eq!(store.status(), Status::Error);
}
