//! Poll API and live frame sink.
//!
//! A small HTTP/1.1 server. The accept loop runs on its own thread and hands
//! each connection to a short-lived handler thread, so a slow client only
//! holds up itself. Every handler takes one copy out of the state store and
//! does its serialisation or JPEG encoding after the lock is released.

use anyhow::{anyhow, Result};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::state::DetectionStateStore;

const MAX_REQUEST_BYTES: u64 = 8192;
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const READ_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_JPEG_QUALITY: u8 = 85;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub jpeg_quality: u8,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:5002".to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    store: Arc<DetectionStateStore>,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, store: Arc<DetectionStateStore>) -> Self {
        Self { cfg, store }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let cfg = self.cfg;
        let store = self.store;
        let join = std::thread::Builder::new()
            .name("voxel-api".to_string())
            .spawn(move || {
                if let Err(err) = run_api(listener, cfg, store, shutdown_thread) {
                    log::error!("detection api stopped: {}", err);
                }
            })?;

        Ok(ApiHandle {
            addr,
            shutdown,
            join: Some(join),
        })
    }
}

fn run_api(
    listener: TcpListener,
    cfg: ApiConfig,
    store: Arc<DetectionStateStore>,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let cfg = Arc::new(cfg);
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let cfg = cfg.clone();
                let store = store.clone();
                let spawned = std::thread::Builder::new()
                    .name("voxel-api-conn".to_string())
                    .spawn(move || {
                        if let Err(err) = handle_connection(stream, &cfg, &store) {
                            log::warn!("detection api request from {} failed: {:#}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("detection api could not spawn a handler: {}", err);
                }
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL);
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, cfg: &ApiConfig, store: &DetectionStateStore) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let (method, path) = read_request_line(&stream)?;

    let response = match (method.as_str(), path.as_str()) {
        ("GET", "/") => Response::text("voxel detection api: /health /detections /frame.jpg\n"),
        ("GET", "/health") => Response::json(200, br#"{"status":"ok"}"#.to_vec()),
        ("GET", "/detections") => Response::json(200, serde_json::to_vec(&store.snapshot())?),
        ("GET", "/frame.jpg") => match store.annotated_frame().to_jpeg(cfg.jpeg_quality) {
            Ok(jpeg) => Response::new(200, "image/jpeg", jpeg),
            Err(err) => {
                log::error!("frame encode failed: {:#}", err);
                Response::error(500, "encode_failed")
            }
        },
        (_, "/" | "/health" | "/detections" | "/frame.jpg") => Response::error(405, "method_not_allowed"),
        _ => Response::error(404, "not_found"),
    };
    response.send(&mut stream)
}

/// Reads `METHOD /path` and drains the headers. Query strings are dropped.
fn read_request_line(stream: &TcpStream) -> Result<(String, String)> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES));
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let mut parts = line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("empty request"))?.to_string();
    let target = parts.next().ok_or_else(|| anyhow!("request line has no path"))?;
    let path = match target.split_once('?') {
        Some((path, _)) => path.to_string(),
        None => target.to_string(),
    };

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(anyhow!("request headers truncated"));
        }
        if line.trim_end().is_empty() {
            break;
        }
    }
    Ok((method, path))
}

struct Response {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Response {
    fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    fn text(body: &str) -> Self {
        Self::new(200, "text/plain; charset=utf-8", body.as_bytes().to_vec())
    }

    fn json(status: u16, body: Vec<u8>) -> Self {
        Self::new(status, "application/json", body)
    }

    fn error(status: u16, code: &str) -> Self {
        Self::json(status, serde_json::json!({ "error": code }).to_string().into_bytes())
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            404 => "Not Found",
            405 => "Method Not Allowed",
            _ => "Internal Server Error",
        }
    }

    fn send(&self, stream: &mut TcpStream) -> Result<()> {
        write!(
            stream,
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len()
        )?;
        stream.write_all(&self.body)?;
        stream.flush()?;
        Ok(())
    }
}
