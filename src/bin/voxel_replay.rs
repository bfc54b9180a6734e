//! voxel_replay - push image files to a voxeld host in the VXL0 format.
//!
//! Plays the device side of the protocol: connects to the advertised
//! endpoint and writes one frame per file, optionally looping, until the
//! files run out or Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Duration;

use voxel_vision::device::{collect_frame_files, load_frames, push_frames, ReplayOptions};
use voxel_vision::ingest::DEFAULT_MAX_FRAME_BYTES;

#[derive(Parser, Debug)]
#[command(author, version, about = "Push image files to a voxeld stream listener")]
struct Args {
    /// Listener address to push to.
    #[arg(long, env = "VOXEL_REPLAY_TARGET", default_value = "127.0.0.1:9000")]
    target: String,

    /// Image files, or directories of .jpg/.jpeg/.png files.
    #[arg(required = true, value_name = "PATH")]
    frames: Vec<PathBuf>,

    /// Pause between frames.
    #[arg(long, default_value_t = 100)]
    interval_ms: u64,

    /// Start over after the last frame.
    #[arg(long = "loop")]
    looping: bool,

    /// Refuse to send any file larger than this.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let files = collect_frame_files(&args.frames)?;
    let frames = load_frames(&files)?;
    log::info!("loaded {} frame(s)", frames.len());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    let mut stream = TcpStream::connect(&args.target)
        .with_context(|| format!("connect to {}", args.target))?;
    log::info!("connected to {}", args.target);

    let options = ReplayOptions {
        frame_interval: Duration::from_millis(args.interval_ms),
        looping: args.looping,
        max_frame_bytes: args.max_frame_bytes,
    };
    let sent = AtomicU64::new(0);
    let count = push_frames(&mut stream, &frames, &options, &stop, &sent)?;
    log::info!("sent {} frame(s) to {}", count, args.target);
    Ok(())
}
