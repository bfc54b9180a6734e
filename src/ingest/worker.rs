use anyhow::{anyhow, Result};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::codec::FrameDecoder;
use crate::config::VoxelConfig;
use crate::device::{establish, DeviceSession, SessionConfig, StreamSession};
use crate::pipeline::{Dispatcher, FrameOutcome};
use crate::state::{AnnotatedFrame, DetectionStateStore};

const THROUGHPUT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerConfig {
    pub session: SessionConfig,
    pub max_frame_bytes: usize,
    pub throughput_interval: Duration,
}

impl From<&VoxelConfig> for WorkerConfig {
    fn from(cfg: &VoxelConfig) -> Self {
        Self {
            session: cfg.session_config(),
            max_frame_bytes: cfg.stream.max_frame_bytes,
            throughput_interval: THROUGHPUT_INTERVAL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The device closed the stream between frames.
    EndOfStream,
    /// A stop was requested.
    Stopped,
    /// Fatal error; the message is also in the store.
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionReport {
    pub peer: Option<SocketAddr>,
    pub frames_decoded: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub exit: ExitReason,
}

impl SessionReport {
    fn new(exit: ExitReason) -> Self {
        Self {
            peer: None,
            frames_decoded: 0,
            frames_processed: 0,
            frames_skipped: 0,
            exit,
        }
    }
}

/// Stop request shared between the handle and the worker.
///
/// Besides the flag it holds a clone of the stream socket, so a stop can
/// unblock a read that is waiting on a silent device.
#[derive(Default)]
struct StopSignal {
    requested: AtomicBool,
    connection: Mutex<Option<TcpStream>>,
}

impl StopSignal {
    fn is_set(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let guard = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(connection) = guard.as_ref() {
            let _ = connection.shutdown(Shutdown::Read);
        }
    }

    fn watch(&self, connection: Option<TcpStream>) {
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = connection;
    }
}

pub struct IngestHandle {
    stop: Arc<StopSignal>,
    join: Option<JoinHandle<SessionReport>>,
}

impl IngestHandle {
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Asks the worker to stop at the next frame boundary and waits for it.
    pub fn stop(mut self) -> Result<SessionReport> {
        self.stop.request();
        self.wait()
    }

    /// Waits for the session to end on its own.
    pub fn join(mut self) -> Result<SessionReport> {
        self.wait()
    }

    fn wait(&mut self) -> Result<SessionReport> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("ingest worker already joined"))?;
        join.join().map_err(|_| anyhow!("ingest worker thread panicked"))
    }
}

pub struct IngestWorker;

impl IngestWorker {
    /// Starts one device session on its own thread.
    pub fn spawn(
        config: WorkerConfig,
        device: Box<dyn DeviceSession>,
        dispatcher: Dispatcher,
        store: Arc<DetectionStateStore>,
    ) -> Result<IngestHandle> {
        let stop = Arc::new(StopSignal::default());
        let stop_thread = stop.clone();
        let join = std::thread::Builder::new()
            .name("voxel-ingest".to_string())
            .spawn(move || run_session(&config, device, dispatcher, &store, &stop_thread))?;
        Ok(IngestHandle {
            stop,
            join: Some(join),
        })
    }
}

fn run_session(
    config: &WorkerConfig,
    device: Box<dyn DeviceSession>,
    mut dispatcher: Dispatcher,
    store: &DetectionStateStore,
    stop: &StopSignal,
) -> SessionReport {
    store.show_placeholder(AnnotatedFrame::placeholder());

    let mut session = match establish(device, &config.session, &stop.requested) {
        Ok(session) => session,
        Err(err) => {
            if stop.is_set() {
                log::info!("stop requested before the stream connected");
                return SessionReport::new(ExitReason::Stopped);
            }
            let message = format!("{:#}", err);
            log::error!("session setup failed: {}", message);
            store.set_error(message.clone());
            return SessionReport::new(ExitReason::Failed(message));
        }
    };

    dispatcher.begin(store);
    let mut report = SessionReport::new(ExitReason::EndOfStream);
    report.peer = session.peer();
    let exit = stream_frames(config, &mut session, &mut dispatcher, store, stop, &mut report);
    report.exit = exit;
    stop.watch(None);

    match &report.exit {
        ExitReason::EndOfStream => log::info!("stream ended after {} frame(s)", report.frames_decoded),
        ExitReason::Stopped => log::info!("stream stopped after {} frame(s)", report.frames_decoded),
        ExitReason::Failed(message) => {
            log::error!("stream failed: {}", message);
            store.set_error(message.clone());
        }
    }
    session.close();
    report
}

fn stream_frames(
    config: &WorkerConfig,
    session: &mut StreamSession,
    dispatcher: &mut Dispatcher,
    store: &DetectionStateStore,
    stop: &StopSignal,
    report: &mut SessionReport,
) -> ExitReason {
    let connection = match session.connection() {
        Ok(connection) => connection,
        Err(err) => return ExitReason::Failed(format!("{:#}", err)),
    };
    stop.watch(connection.try_clone().ok());

    let mut decoder = FrameDecoder::new(config.max_frame_bytes);
    let mut meter = Throughput::new(config.throughput_interval);

    loop {
        if stop.is_set() {
            return ExitReason::Stopped;
        }

        let receive_started = Instant::now();
        let frame = match decoder.decode_next(connection) {
            Ok(Some(frame)) => frame,
            Ok(None) if stop.is_set() => return ExitReason::Stopped,
            Ok(None) => return ExitReason::EndOfStream,
            Err(_) if stop.is_set() => return ExitReason::Stopped,
            Err(err) => return ExitReason::Failed(format!("{:#}", err)),
        };
        let receive_time = receive_started.elapsed();
        report.frames_decoded += 1;

        let process_started = Instant::now();
        match dispatcher.process(&frame, store) {
            Ok(FrameOutcome::Processed) => report.frames_processed += 1,
            Ok(FrameOutcome::Skipped) => report.frames_skipped += 1,
            Err(err) => return ExitReason::Failed(format!("frame {}: {:#}", frame.sequence, err)),
        }
        meter.record(receive_time, process_started.elapsed());
    }
}

/// Frame rate and per-stage timings, logged once per interval.
struct Throughput {
    interval: Duration,
    window_started: Instant,
    frames: u32,
    receive: Duration,
    process: Duration,
}

impl Throughput {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            window_started: Instant::now(),
            frames: 0,
            receive: Duration::ZERO,
            process: Duration::ZERO,
        }
    }

    fn record(&mut self, receive: Duration, process: Duration) {
        self.frames += 1;
        self.receive += receive;
        self.process += process;

        let elapsed = self.window_started.elapsed();
        if elapsed < self.interval {
            return;
        }
        let frames = self.frames.max(1);
        log::info!(
            "throughput: {:.1} fps, receive {:.1} ms/frame, processing {:.1} ms/frame",
            self.frames as f64 / elapsed.as_secs_f64(),
            self.receive.as_secs_f64() * 1000.0 / frames as f64,
            self.process.as_secs_f64() * 1000.0 / frames as f64
        );
        *self = Self::new(self.interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_window_resets_after_interval() {
        let mut meter = Throughput::new(Duration::ZERO);
        meter.record(Duration::from_millis(3), Duration::from_millis(7));
        assert_eq!(meter.frames, 0);
        assert_eq!(meter.process, Duration::ZERO);

        let mut meter = Throughput::new(Duration::from_secs(3600));
        meter.record(Duration::from_millis(3), Duration::from_millis(7));
        meter.record(Duration::from_millis(3), Duration::from_millis(7));
        assert_eq!(meter.frames, 2);
        assert_eq!(meter.receive, Duration::from_millis(6));
    }

    #[test]
    fn worker_config_follows_the_daemon_config() {
        let mut cfg = VoxelConfig::default();
        cfg.stream.max_frame_bytes = 1024;
        cfg.stream.port = 9100;
        let worker = WorkerConfig::from(&cfg);
        assert_eq!(worker.max_frame_bytes, 1024);
        assert_eq!(worker.session.stream_port, 9100);
        assert_eq!(worker.throughput_interval, THROUGHPUT_INTERVAL);
    }
}
