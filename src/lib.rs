//! Voxel Vision
//!
//! Ingests a live image stream pushed by a remote device, runs every frame
//! through one detection strategy, and publishes the latest results and
//! annotated frame to any number of readers.
//!
//! # Architecture
//!
//! ```text
//! device session ──▶ VXL0 codec ──▶ dispatcher ──▶ state store ◀── poll API
//!   (establish)       (decode)      (strategy)     (one lock)      display
//! ```
//!
//! One ingestion thread per session is the only writer to the store. It
//! handles one frame end-to-end before reading the next, so at most one
//! frame is in flight and backpressure is implicit.
//!
//! # Module Structure
//!
//! - `device`: device capability, stream setup and guaranteed teardown
//! - `ingest`: wire codec and the ingestion worker
//! - `pipeline`: dispatcher and the tracking, inspection and summary strategies
//! - `state`: detection state store and its data model
//! - `detect`: detector/classifier capabilities and scripted backends
//! - `annotate`, `frame`: overlays and frame helpers
//! - `api`: HTTP poll endpoint and frame sink
//! - `config`, `error`: configuration and failure taxonomy

pub mod annotate;
pub mod api;
pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod state;

pub use config::VoxelConfig;
pub use detect::{Classification, Classifier, DetectionBox, Detector, LazyDetector};
pub use device::{establish, DeviceSession, SessionConfig, StreamResponse, StreamSession};
pub use error::{FailureClass, PipelineError};
pub use frame::Frame;
pub use ingest::{ExitReason, FrameDecoder, IngestHandle, IngestWorker, SessionReport, WorkerConfig};
pub use pipeline::{DetectorSet, Dispatcher, PipelineSettings, StrategyKind};
pub use state::{AnnotatedFrame, DetectionStateSnapshot, DetectionStateStore, Payload, Status};
