//! voxeld - Voxel stream ingestion daemon
//!
//! This daemon:
//! 1. Loads configuration (VOXEL_CONFIG + VOXEL_* env, then flags)
//! 2. Serves the detection poll API
//! 3. Runs device sessions on the ingestion worker until Ctrl-C
//!
//! Without hardware, `--replay` stands in for the device and pushes image
//! files back to this host. Detectors are scripted from JSON box lists.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use voxel_vision::api::{ApiConfig, ApiServer};
use voxel_vision::detect::{DetectionBox, Detector, LazyDetector, ScriptedClassifier, ScriptedDetector};
use voxel_vision::device::{collect_frame_files, load_frames, DeviceSession, PassiveDevice, ReplayDevice, ReplayOptions};
use voxel_vision::{DetectionStateStore, DetectorSet, Dispatcher, ExitReason, IngestWorker, StrategyKind, VoxelConfig, WorkerConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Ingest a pushed VXL0 image stream and serve detection state")]
struct Args {
    /// Detection strategy: tracking, inspection or summary.
    #[arg(long)]
    mode: Option<String>,

    /// Stream listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Poll API listen address.
    #[arg(long)]
    api_addr: Option<String>,

    /// Replay these image files (or directories of images) as the device.
    #[arg(long, value_name = "PATH", num_args = 1..)]
    replay: Vec<PathBuf>,

    /// Pause between replayed frames.
    #[arg(long, default_value_t = 100)]
    replay_interval_ms: u64,

    /// Loop the replay instead of ending the stream after the last frame.
    #[arg(long)]
    replay_loop: bool,

    /// JSON array of boxes the primary detector returns for every frame.
    #[arg(long, env = "VOXEL_DETECTIONS", value_name = "PATH")]
    detections: Option<PathBuf>,

    /// JSON array of boxes the defect detector returns (inspection mode).
    #[arg(long, env = "VOXEL_DEFECTS", value_name = "PATH")]
    defects: Option<PathBuf>,

    /// Label the scripted classifier assigns to the subject.
    #[arg(long, default_value = "vehicle")]
    classify_as: String,

    /// Start a new session after the stream ends.
    #[arg(long)]
    reconnect: bool,

    /// Delay between sessions when using --reconnect.
    #[arg(long, env = "VOXEL_RECONNECT_DELAY_SECS", default_value_t = 2)]
    reconnect_delay_secs: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = VoxelConfig::load()?;
    if let Some(mode) = &args.mode {
        cfg.mode = mode.parse()?;
    }
    if let Some(port) = args.port {
        cfg.stream.port = port;
    }
    if let Some(addr) = &args.api_addr {
        cfg.api_addr = addr.clone();
    }
    if !args.replay.is_empty() && cfg.stream.advertise_ip.is_none() {
        cfg.stream.advertise_ip = Some(std::net::Ipv4Addr::LOCALHOST.into());
    }
    cfg.validate()?;

    let primary_boxes = read_boxes(args.detections.as_deref())?;
    let defect_boxes = read_boxes(args.defects.as_deref())?;
    let replay_frames = if args.replay.is_empty() {
        None
    } else {
        let files = collect_frame_files(&args.replay)?;
        log::info!("replaying {} frame file(s)", files.len());
        Some(load_frames(&files)?)
    };

    let store = DetectionStateStore::shared();
    let api_handle = ApiServer::new(
        ApiConfig {
            addr: cfg.api_addr.clone(),
            jpeg_quality: cfg.pipeline.jpeg_quality,
        },
        store.clone(),
    )
    .spawn()?;
    log::info!("detection api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("error setting Ctrl-C handler")?;

    let mut shutdown = false;
    loop {
        let dispatcher = build_dispatcher(&cfg, &args, &primary_boxes, &defect_boxes)?;
        let device: Box<dyn DeviceSession> = match &replay_frames {
            Some(frames) => Box::new(ReplayDevice::new(
                cfg.device_name.clone(),
                frames.clone(),
                ReplayOptions {
                    frame_interval: Duration::from_millis(args.replay_interval_ms),
                    looping: args.replay_loop,
                    max_frame_bytes: cfg.stream.max_frame_bytes,
                },
            )),
            None => Box::new(PassiveDevice::new(cfg.device_name.clone())),
        };

        let handle = IngestWorker::spawn(WorkerConfig::from(&cfg), device, dispatcher, store.clone())?;
        let interrupted = loop {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(()) => break true,
                Err(RecvTimeoutError::Timeout) if handle.is_finished() => break false,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break true,
            }
        };

        let report = if interrupted {
            log::info!("shutdown signal received, stopping ingestion...");
            handle.stop()?
        } else {
            handle.join()?
        };
        log::info!(
            "session over: {:?}, {} decoded, {} processed, {} skipped",
            report.exit,
            report.frames_decoded,
            report.frames_processed,
            report.frames_skipped
        );

        if interrupted || report.exit == ExitReason::Stopped {
            shutdown = true;
            break;
        }
        if !args.reconnect {
            break;
        }
        log::info!("starting a new session in {}s", args.reconnect_delay_secs);
        if rx.recv_timeout(Duration::from_secs(args.reconnect_delay_secs)).is_ok() {
            shutdown = true;
            break;
        }
    }

    if !shutdown {
        log::info!("serving final state until Ctrl-C...");
        let _ = rx.recv();
    }
    api_handle.stop()?;
    log::info!("voxeld stopped");
    Ok(())
}

fn build_dispatcher(
    cfg: &VoxelConfig,
    args: &Args,
    primary_boxes: &[DetectionBox],
    defect_boxes: &[DetectionBox],
) -> Result<Dispatcher> {
    let mut detectors = DetectorSet::new(Box::new(ScriptedDetector::repeating(primary_boxes.to_vec())));
    if cfg.mode == StrategyKind::Inspection {
        let defects = defect_boxes.to_vec();
        detectors = detectors
            .with_classifier(Box::new(ScriptedClassifier::new(args.classify_as.clone(), 90.0)))
            .with_defect(LazyDetector::new("defect", move || {
                Ok(Box::new(ScriptedDetector::repeating(defects)) as Box<dyn Detector>)
            }));
    }
    Dispatcher::from_mode(cfg.mode, detectors, cfg.pipeline.clone())
}

fn read_boxes(path: Option<&Path>) -> Result<Vec<DetectionBox>> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read detections file {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("invalid detections file {}: {}", path.display(), e))
}
