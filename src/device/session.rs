use anyhow::Result;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::{local_ip, DeviceError, DeviceSession};
use crate::error::PipelineError;

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub bind_ip: IpAddr,
    /// Listen port. 0 picks an ephemeral port, which is what gets advertised.
    pub stream_port: u16,
    pub accept_timeout: Duration,
    /// Remote address used only to learn the outward-facing interface.
    pub ip_probe_addr: String,
    /// Address to advertise instead of the discovered one.
    pub advertise_ip: Option<IpAddr>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            stream_port: 9000,
            accept_timeout: Duration::from_secs(20),
            ip_probe_addr: "8.8.8.8:80".to_string(),
            advertise_ip: None,
        }
    }
}

/// A live device stream.
///
/// Owns the device handle and the accepted connection. Teardown runs exactly
/// once, from [`StreamSession::close`] or from `Drop`, whichever comes first.
pub struct StreamSession {
    device: Box<dyn DeviceSession>,
    connection: Option<TcpStream>,
    peer: Option<SocketAddr>,
    device_connected: bool,
    closed: bool,
}

impl StreamSession {
    fn new(device: Box<dyn DeviceSession>) -> Self {
        Self {
            device,
            connection: None,
            peer: None,
            device_connected: false,
            closed: false,
        }
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// The accepted stream connection.
    pub fn connection(&mut self) -> Result<&mut TcpStream> {
        self.connection
            .as_mut()
            .ok_or_else(|| PipelineError::connect("stream connection already closed"))
    }

    /// Closes the connection, stops the remote stream and disconnects.
    ///
    /// Failures are logged and never returned. Later calls do nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(connection) = self.connection.take() {
            if let Err(err) = connection.shutdown(std::net::Shutdown::Both) {
                if err.kind() != ErrorKind::NotConnected {
                    log_cleanup("close stream connection", &err.into());
                }
            }
            log::debug!("stream connection closed");
        }

        if self.device_connected {
            log::info!("stopping stream on {}", self.device.name());
            if let Err(err) = self.device.stop_stream() {
                log_cleanup("stop stream", &err);
            }
        }

        if self.device.is_connected() {
            match self.device.disconnect() {
                Ok(()) => log::info!("disconnected from {}", self.device.name()),
                Err(err) => log_cleanup("disconnect", &err),
            }
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn log_cleanup(step: &str, err: &anyhow::Error) {
    let reentrant = err
        .chain()
        .any(|cause| matches!(cause.downcast_ref::<DeviceError>(), Some(DeviceError::Reentrant)));
    if reentrant {
        log::warn!("{} skipped during teardown: {:#}", step, err);
    } else {
        log::error!("{}", PipelineError::Cleanup(format!("{} failed: {:#}", step, err)));
    }
}

/// Brings a device stream up.
///
/// Connects the device, listens on `config.bind_ip:config.stream_port`,
/// asks the device to push to this host, and waits for the single inbound
/// connection. Any failure is a `Connect` error; teardown of whatever was
/// already set up runs before it is returned. `stop` aborts the accept wait.
pub fn establish(device: Box<dyn DeviceSession>, config: &SessionConfig, stop: &AtomicBool) -> Result<StreamSession> {
    let mut session = StreamSession::new(device);

    log::info!("connecting to device {}", session.device.name());
    session
        .device
        .connect()
        .map_err(|err| PipelineError::connect(format!("device {} unreachable: {:#}", session.device.name(), err)))?;
    session.device_connected = true;

    let bind_addr = SocketAddr::new(config.bind_ip, config.stream_port);
    let listener = TcpListener::bind(bind_addr)
        .map_err(|err| PipelineError::connect(format!("bind stream listener on {}: {}", bind_addr, err)))?;
    let port = listener
        .local_addr()
        .map_err(|err| PipelineError::connect(format!("listener address: {}", err)))?
        .port();
    log::info!("stream listener bound on {}:{}", config.bind_ip, port);

    let host_ip = match config.advertise_ip {
        Some(ip) => ip,
        None => local_ip(&config.ip_probe_addr),
    };
    log::info!("requesting stream to {}:{}", host_ip, port);

    let response = session
        .device
        .start_stream(host_ip, port)
        .map_err(|err| PipelineError::connect(format!("stream request failed: {:#}", err)))?;
    if let Some(reason) = response.error {
        return Err(PipelineError::connect(format!("device refused stream: {}", reason)));
    }

    let (connection, peer) = accept_within(&listener, config.accept_timeout, stop)?;
    drop(listener);
    log::info!("stream connected from {}", peer);

    session.connection = Some(connection);
    session.peer = Some(peer);
    Ok(session)
}

fn accept_within(listener: &TcpListener, timeout: Duration, stop: &AtomicBool) -> Result<(TcpStream, SocketAddr)> {
    listener
        .set_nonblocking(true)
        .map_err(|err| PipelineError::connect(format!("listener setup: {}", err)))?;
    let deadline = Instant::now() + timeout;
    loop {
        if stop.load(Ordering::SeqCst) {
            return Err(PipelineError::connect("stopped while waiting for the stream"));
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                stream
                    .set_nonblocking(false)
                    .map_err(|err| PipelineError::connect(format!("stream setup: {}", err)))?;
                return Ok((stream, peer));
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(PipelineError::connect(format!(
                        "no stream connection within {}s",
                        timeout.as_secs_f32()
                    )));
                }
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(PipelineError::connect(format!("accept failed: {}", err))),
        }
    }
}
