//! Device session management.
//!
//! The remote device is reached through an opaque [`DeviceSession`]: how it
//! connects (BLE, serial, HTTP) is the implementation's business. This
//! module negotiates the push endpoint, asks the device to start streaming
//! to it, accepts the one inbound connection, and guarantees teardown.

mod net;
mod passive;
mod replay;
mod session;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::IpAddr;
use thiserror::Error;

pub use net::local_ip;
pub use passive::PassiveDevice;
pub use replay::{collect_frame_files, load_frames, push_frames, ReplayDevice, ReplayOptions, ReplayProbe};
pub use session::{establish, SessionConfig, StreamSession};

/// Control channel to a streaming device.
///
/// Called only from the ingestion thread.
pub trait DeviceSession: Send {
    fn name(&self) -> &str;

    fn connect(&mut self) -> Result<()>;

    /// Asks the device to push its stream to `host_ip:port`.
    fn start_stream(&mut self, host_ip: IpAddr, port: u16) -> Result<StreamResponse>;

    fn stop_stream(&mut self) -> Result<()>;

    fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;
}

/// Device reply to a stream request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct StreamResponse {
    /// Set when the device refused or failed to start the stream.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub raw_response: Option<String>,
}

impl StreamResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            raw_response: None,
        }
    }

    pub fn from_json(body: &str) -> Result<Self> {
        let mut response: StreamResponse =
            serde_json::from_str(body).context("parse stream response")?;
        if response.raw_response.is_none() {
            response.raw_response = Some(body.to_string());
        }
        Ok(response)
    }
}

/// Failures a device implementation reports during teardown.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Disconnect was invoked from the device's own worker, which cannot
    /// join itself. Harmless during teardown.
    #[error("disconnect re-entered from the device worker")]
    Reentrant,

    #[error("device not connected")]
    NotConnected,

    #[error("device transport failed: {0}")]
    Transport(String),
}
