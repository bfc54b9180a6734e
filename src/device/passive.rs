use anyhow::Result;
use std::net::IpAddr;

use super::{DeviceSession, StreamResponse};

/// Device whose stream is started out-of-band.
///
/// Every command succeeds. The push target is logged so an operator (or a
/// `voxel_replay` process) can point the device at it.
pub struct PassiveDevice {
    name: String,
    connected: bool,
}

impl PassiveDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connected: false,
        }
    }
}

impl DeviceSession for PassiveDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn start_stream(&mut self, host_ip: IpAddr, port: u16) -> Result<StreamResponse> {
        log::info!("{}: waiting for a VXL0 stream pushed to {}:{}", self.name, host_ip, port);
        Ok(StreamResponse::ok())
    }

    fn stop_stream(&mut self) -> Result<()> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
