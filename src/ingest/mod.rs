//! Frame ingestion.
//!
//! `codec` turns the device's byte stream into frames. `worker` owns the
//! session on a dedicated thread: connect, decode, dispatch, write, and
//! teardown. It is the only writer to the detection state store.
//!
//! Frames are processed strictly one at a time. A slow detector slows
//! consumption off the socket; nothing is queued.

pub mod codec;
mod worker;

pub use codec::{encode_frame, read_exact_or_eof, FrameDecoder, DEFAULT_MAX_FRAME_BYTES, MAGIC};
pub use worker::{ExitReason, IngestHandle, IngestWorker, SessionReport, WorkerConfig};
