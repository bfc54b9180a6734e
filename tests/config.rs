use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use voxel_vision::config::VoxelConfig;
use voxel_vision::StrategyKind;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "VOXEL_CONFIG",
        "VOXEL_DEVICE_NAME",
        "VOXEL_STREAM_PORT",
        "VOXEL_ACCEPT_TIMEOUT_SECS",
        "VOXEL_MAX_FRAME_BYTES",
        "VOXEL_MODE",
        "VOXEL_API_ADDR",
        "VOXEL_ADVERTISE_IP",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(json: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        r#"{
            "device_name": "bench-rig",
            "stream": {
                "port": 9100,
                "accept_timeout_secs": 5,
                "max_frame_bytes": 1048576
            },
            "pipeline": {
                "mode": "tracking",
                "coarse_confidence": 0.3,
                "trusted_confidence": 0.7,
                "subject_class": "truck"
            },
            "api": {
                "addr": "0.0.0.0:8080"
            }
        }"#,
    );

    std::env::set_var("VOXEL_CONFIG", file.path());
    std::env::set_var("VOXEL_MODE", "Inspection");
    std::env::set_var("VOXEL_ADVERTISE_IP", "10.0.0.7");

    let cfg = VoxelConfig::load().expect("load config");

    assert_eq!(cfg.device_name, "bench-rig");
    assert_eq!(cfg.stream.port, 9100);
    assert_eq!(cfg.stream.accept_timeout, Duration::from_secs(5));
    assert_eq!(cfg.stream.max_frame_bytes, 1_048_576);
    assert_eq!(cfg.stream.advertise_ip, Some("10.0.0.7".parse().unwrap()));
    assert_eq!(cfg.mode, StrategyKind::Inspection);
    assert_eq!(cfg.pipeline.coarse_confidence, 0.3);
    assert_eq!(cfg.pipeline.trusted_confidence, 0.7);
    assert_eq!(cfg.pipeline.subject_class, "truck");
    assert_eq!(cfg.api_addr, "0.0.0.0:8080");

    let session = cfg.session_config();
    assert_eq!(session.stream_port, 9100);
    assert_eq!(session.advertise_ip, cfg.stream.advertise_ip);

    clear_env();
}

#[test]
fn defaults_apply_without_a_config_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = VoxelConfig::load().expect("load defaults");
    assert_eq!(cfg, VoxelConfig::default());
    assert_eq!(cfg.stream.port, 9000);
    assert_eq!(cfg.stream.max_frame_bytes, 5 * 1024 * 1024);
    assert_eq!(cfg.mode, StrategyKind::Summary);

    clear_env();
}

#[test]
fn rejects_unknown_fields() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(r#"{ "stream": { "port": 9000, "fps": 30 } }"#);
    std::env::set_var("VOXEL_CONFIG", file.path());
    assert!(VoxelConfig::load().is_err());

    clear_env();
}

#[test]
fn rejects_invalid_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("VOXEL_STREAM_PORT", "not-a-port");
    assert!(VoxelConfig::load().is_err());
    clear_env();

    std::env::set_var("VOXEL_STREAM_PORT", "0");
    assert!(VoxelConfig::load().is_err());
    clear_env();

    std::env::set_var("VOXEL_MAX_FRAME_BYTES", "0");
    assert!(VoxelConfig::load().is_err());
    clear_env();

    std::env::set_var("VOXEL_MODE", "ensemble");
    assert!(VoxelConfig::load().is_err());

    clear_env();
}
