use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::net::{IpAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::{DeviceError, DeviceSession, StreamResponse};
use crate::ingest::codec::{encode_frame, DEFAULT_MAX_FRAME_BYTES};

#[derive(Clone, Debug)]
pub struct ReplayOptions {
    /// Pause between frames. Zero sends back-to-back.
    pub frame_interval: Duration,
    /// Start over after the last frame instead of closing the connection.
    pub looping: bool,
    pub max_frame_bytes: usize,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(100),
            looping: false,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Call counters shared with a [`ReplayDevice`].
#[derive(Debug, Default)]
pub struct ReplayProbe {
    pub connects: AtomicUsize,
    pub stream_requests: AtomicUsize,
    pub stream_stops: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub frames_sent: AtomicU64,
}

/// Stand-in device that pushes a fixed list of encoded images.
///
/// `start_stream` spawns a sender thread that connects back to the
/// advertised endpoint and writes every image in the VXL0 format, then
/// closes the connection (or loops, if asked).
pub struct ReplayDevice {
    name: String,
    frames: Arc<Vec<Vec<u8>>>,
    options: ReplayOptions,
    connected: bool,
    probe: Arc<ReplayProbe>,
    stop: Arc<AtomicBool>,
    sender: Option<JoinHandle<()>>,
}

impl ReplayDevice {
    pub fn new(name: impl Into<String>, frames: Vec<Vec<u8>>, options: ReplayOptions) -> Self {
        Self {
            name: name.into(),
            frames: Arc::new(frames),
            options,
            connected: false,
            probe: Arc::new(ReplayProbe::default()),
            stop: Arc::new(AtomicBool::new(false)),
            sender: None,
        }
    }

    /// Loads every file in `paths` as one frame, in order.
    pub fn from_files(name: impl Into<String>, paths: &[PathBuf], options: ReplayOptions) -> Result<Self> {
        let frames = load_frames(paths)?;
        Ok(Self::new(name, frames, options))
    }

    pub fn probe(&self) -> Arc<ReplayProbe> {
        self.probe.clone()
    }
}

impl DeviceSession for ReplayDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        if self.frames.is_empty() {
            return Err(anyhow!("replay device {} has no frames", self.name));
        }
        self.connected = true;
        Ok(())
    }

    fn start_stream(&mut self, host_ip: IpAddr, port: u16) -> Result<StreamResponse> {
        self.probe.stream_requests.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return Err(DeviceError::NotConnected.into());
        }
        if self.sender.is_some() {
            return Ok(StreamResponse::refused("stream already running"));
        }

        self.stop.store(false, Ordering::SeqCst);
        let frames = self.frames.clone();
        let options = self.options.clone();
        let probe = self.probe.clone();
        let stop = self.stop.clone();
        let name = self.name.clone();
        let sender = std::thread::Builder::new()
            .name(format!("replay-{}", name))
            .spawn(move || {
                let result = TcpStream::connect((host_ip, port))
                    .with_context(|| format!("connect to {}:{}", host_ip, port))
                    .and_then(|mut stream| push_frames(&mut stream, &frames, &options, &stop, &probe.frames_sent));
                match result {
                    Ok(sent) => log::info!("replay {}: sent {} frame(s)", name, sent),
                    Err(err) => log::warn!("replay {}: sender stopped: {:#}", name, err),
                }
            })
            .context("spawn replay sender")?;
        self.sender = Some(sender);
        Ok(StreamResponse::ok())
    }

    fn stop_stream(&mut self) -> Result<()> {
        self.probe.stream_stops.fetch_add(1, Ordering::SeqCst);
        self.stop.store(true, Ordering::SeqCst);
        if let Some(sender) = self.sender.take() {
            sender
                .join()
                .map_err(|_| DeviceError::Transport("replay sender panicked".to_string()))?;
        }
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.probe.disconnects.fetch_add(1, Ordering::SeqCst);
        if !self.connected {
            return Err(DeviceError::NotConnected.into());
        }
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Writes `frames` to `writer` in the VXL0 format until done or stopped.
///
/// Returns the number of frames written.
pub fn push_frames<W: Write + ?Sized>(
    writer: &mut W,
    frames: &[Vec<u8>],
    options: &ReplayOptions,
    stop: &AtomicBool,
    sent: &AtomicU64,
) -> Result<u64> {
    let mut count = 0u64;
    loop {
        for payload in frames {
            if stop.load(Ordering::SeqCst) {
                return Ok(count);
            }
            encode_frame(writer, payload, options.max_frame_bytes)?;
            writer.flush().context("flush frame")?;
            count += 1;
            sent.fetch_add(1, Ordering::SeqCst);
            if !options.frame_interval.is_zero() {
                std::thread::sleep(options.frame_interval);
            }
        }
        if !options.looping {
            return Ok(count);
        }
    }
}

/// Expands directories into the image files they contain, sorted by name.
///
/// Plain file arguments are kept as given, in order.
pub fn collect_frame_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.is_dir() {
            files.push(path.clone());
            continue;
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
            .with_context(|| format!("list frame directory {}", path.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|candidate| candidate.is_file() && is_image_file(candidate))
            .collect();
        entries.sort();
        files.extend(entries);
    }
    if files.is_empty() {
        return Err(anyhow!("no frame files found"));
    }
    Ok(files)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

/// Reads each path as a raw encoded image.
pub fn load_frames(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths
        .iter()
        .map(|path| read_frame_file(path))
        .collect()
}

fn read_frame_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("read frame file {}", path.display()))
}
