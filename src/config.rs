use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use crate::device::SessionConfig;
use crate::ingest::codec::DEFAULT_MAX_FRAME_BYTES;
use crate::pipeline::{PipelineSettings, StrategyKind};

const DEFAULT_DEVICE_NAME: &str = "voxel";
const DEFAULT_STREAM_PORT: u16 = 9000;
const DEFAULT_ACCEPT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_IP_PROBE_ADDR: &str = "8.8.8.8:80";
const DEFAULT_API_ADDR: &str = "127.0.0.1:5002";
const MAX_FRAME_BYTES_CEILING: usize = 64 * 1024 * 1024;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct VoxelConfigFile {
    device_name: Option<String>,
    stream: Option<StreamConfigFile>,
    pipeline: Option<PipelineConfigFile>,
    api: Option<ApiConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct StreamConfigFile {
    bind_ip: Option<IpAddr>,
    port: Option<u16>,
    accept_timeout_secs: Option<u64>,
    max_frame_bytes: Option<usize>,
    ip_probe_addr: Option<String>,
    advertise_ip: Option<IpAddr>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
    mode: Option<String>,
    coarse_confidence: Option<f32>,
    trusted_confidence: Option<f32>,
    subject_class: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub bind_ip: IpAddr,
    pub port: u16,
    pub accept_timeout: Duration,
    pub max_frame_bytes: usize,
    pub ip_probe_addr: String,
    pub advertise_ip: Option<IpAddr>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_STREAM_PORT,
            accept_timeout: Duration::from_secs(DEFAULT_ACCEPT_TIMEOUT_SECS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            ip_probe_addr: DEFAULT_IP_PROBE_ADDR.to_string(),
            advertise_ip: None,
        }
    }
}

/// Daemon configuration.
///
/// Resolved from an optional JSON file (`VOXEL_CONFIG`), then defaults, then
/// `VOXEL_*` environment overrides, then validated.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelConfig {
    pub device_name: String,
    pub stream: StreamSettings,
    pub mode: StrategyKind,
    pub pipeline: PipelineSettings,
    pub api_addr: String,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            stream: StreamSettings::default(),
            mode: StrategyKind::Summary,
            pipeline: PipelineSettings::default(),
            api_addr: DEFAULT_API_ADDR.to_string(),
        }
    }
}

impl VoxelConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("VOXEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: VoxelConfigFile) -> Result<Self> {
        let defaults = Self::default();
        let stream = file.stream.unwrap_or_default();
        let pipeline = file.pipeline.unwrap_or_default();

        let mode = match pipeline.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => defaults.mode,
        };

        Ok(Self {
            device_name: file.device_name.unwrap_or(defaults.device_name),
            stream: StreamSettings {
                bind_ip: stream.bind_ip.unwrap_or(defaults.stream.bind_ip),
                port: stream.port.unwrap_or(defaults.stream.port),
                accept_timeout: stream
                    .accept_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.stream.accept_timeout),
                max_frame_bytes: stream.max_frame_bytes.unwrap_or(defaults.stream.max_frame_bytes),
                ip_probe_addr: stream.ip_probe_addr.unwrap_or(defaults.stream.ip_probe_addr),
                advertise_ip: stream.advertise_ip,
            },
            mode,
            pipeline: PipelineSettings {
                coarse_confidence: pipeline
                    .coarse_confidence
                    .unwrap_or(defaults.pipeline.coarse_confidence),
                trusted_confidence: pipeline
                    .trusted_confidence
                    .unwrap_or(defaults.pipeline.trusted_confidence),
                subject_class: pipeline
                    .subject_class
                    .unwrap_or(defaults.pipeline.subject_class),
                jpeg_quality: pipeline.jpeg_quality.unwrap_or(defaults.pipeline.jpeg_quality),
            },
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or(defaults.api_addr),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(name) = env_value("VOXEL_DEVICE_NAME") {
            self.device_name = name;
        }
        if let Some(port) = env_value("VOXEL_STREAM_PORT") {
            self.stream.port = port
                .parse()
                .map_err(|_| anyhow!("VOXEL_STREAM_PORT must be a port number"))?;
        }
        if let Some(secs) = env_value("VOXEL_ACCEPT_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| anyhow!("VOXEL_ACCEPT_TIMEOUT_SECS must be an integer number of seconds"))?;
            self.stream.accept_timeout = Duration::from_secs(secs);
        }
        if let Some(bytes) = env_value("VOXEL_MAX_FRAME_BYTES") {
            self.stream.max_frame_bytes = bytes
                .parse()
                .map_err(|_| anyhow!("VOXEL_MAX_FRAME_BYTES must be an integer byte count"))?;
        }
        if let Some(mode) = env_value("VOXEL_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(addr) = env_value("VOXEL_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(ip) = env_value("VOXEL_ADVERTISE_IP") {
            self.stream.advertise_ip = Some(
                ip.parse()
                    .map_err(|_| anyhow!("VOXEL_ADVERTISE_IP must be an IP address"))?,
            );
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        self.device_name = self.device_name.trim().to_string();
        if self.device_name.is_empty() {
            return Err(anyhow!("device name must not be empty"));
        }
        if self.stream.port == 0 {
            return Err(anyhow!("stream port must be non-zero"));
        }
        if self.stream.accept_timeout.is_zero() {
            return Err(anyhow!("accept timeout must be greater than zero"));
        }
        if self.stream.max_frame_bytes == 0 || self.stream.max_frame_bytes > MAX_FRAME_BYTES_CEILING {
            return Err(anyhow!(
                "max frame bytes must be between 1 and {}",
                MAX_FRAME_BYTES_CEILING
            ));
        }
        let coarse = self.pipeline.coarse_confidence;
        let trusted = self.pipeline.trusted_confidence;
        if !(0.0..=1.0).contains(&coarse) || !(0.0..=1.0).contains(&trusted) {
            return Err(anyhow!("confidence thresholds must be within [0, 1]"));
        }
        if trusted < coarse {
            return Err(anyhow!(
                "trusted confidence {} is below the coarse floor {}",
                trusted,
                coarse
            ));
        }
        self.pipeline.subject_class = self.pipeline.subject_class.trim().to_string();
        if self.pipeline.subject_class.is_empty() {
            return Err(anyhow!("subject class must not be empty"));
        }
        if !(1..=100).contains(&self.pipeline.jpeg_quality) {
            return Err(anyhow!("jpeg quality must be between 1 and 100"));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            bind_ip: self.stream.bind_ip,
            stream_port: self.stream.port,
            accept_timeout: self.stream.accept_timeout,
            ip_probe_addr: self.stream.ip_probe_addr.clone(),
            advertise_ip: self.stream.advertise_ip,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<VoxelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
