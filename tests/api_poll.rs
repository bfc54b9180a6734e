use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use image::{Rgb, RgbImage};

use voxel_vision::api::{ApiConfig, ApiServer};
use voxel_vision::state::{summarize, AnnotatedFrame, Payload};
use voxel_vision::{DetectionBox, DetectionStateStore, StrategyKind};

fn request(addr: SocketAddr, method: &str, path: &str) -> (u16, Vec<u8>) {
    let mut stream = TcpStream::connect(addr).expect("connect api");
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(stream, "{} {} HTTP/1.1\r\nHost: localhost\r\n\r\n", method, path).unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).expect("read response");

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .expect("status code");
    (status, raw[split + 4..].to_vec())
}

fn start(store: Arc<DetectionStateStore>) -> voxel_vision::api::ApiHandle {
    ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            ..ApiConfig::default()
        },
        store,
    )
    .spawn()
    .expect("spawn api")
}

#[test]
fn serves_health_snapshot_and_frame() {
    let store = DetectionStateStore::shared();
    let api = start(store.clone());

    let (status, body) = request(api.addr, "GET", "/health");
    assert_eq!(status, 200);
    assert_eq!(body, br#"{"status":"ok"}"#);

    let (status, body) = request(api.addr, "GET", "/detections");
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "initializing");

    store.begin_session(StrategyKind::Summary);
    let boxes = vec![DetectionBox::new("crack", 0.5, 0, 0, 4, 4)];
    store.write(
        Payload::Summary(summarize(&boxes)),
        AnnotatedFrame::new(RgbImage::from_pixel(32, 24, Rgb([0, 0, 0])), 1),
    );

    let (status, body) = request(api.addr, "GET", "/detections?fresh=1");
    assert_eq!(status, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "success");
    assert_eq!(json["strategy"], "summary");
    assert_eq!(json["detections"]["crack"]["count"], 1);
    assert_eq!(json["frames_processed"], 1);

    let (status, body) = request(api.addr, "GET", "/frame.jpg");
    assert_eq!(status, 200);
    assert_eq!(&body[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(&body).expect("decode jpeg");
    assert_eq!((decoded.width(), decoded.height()), (32, 24));

    api.stop().expect("stop api");
}

#[test]
fn rejects_unknown_paths_and_methods() {
    let api = start(DetectionStateStore::shared());

    let (status, _) = request(api.addr, "GET", "/events");
    assert_eq!(status, 404);

    let (status, _) = request(api.addr, "POST", "/detections");
    assert_eq!(status, 405);

    api.stop().expect("stop api");
}

#[test]
fn idle_client_does_not_hold_up_other_pollers() {
    let api = start(DetectionStateStore::shared());

    let _idle = TcpStream::connect(api.addr).expect("idle connection");
    std::thread::sleep(Duration::from_millis(100));

    let started = std::time::Instant::now();
    let (status, _) = request(api.addr, "GET", "/health");
    assert_eq!(status, 200);
    assert!(
        started.elapsed() < Duration::from_secs(1),
        "health took {:?} behind an idle client",
        started.elapsed()
    );

    api.stop().expect("stop api");
}
