//! Configuration management for the MPEG-TS stream server

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub mosaic: MosaicConfig,

    #[serde(default, rename = "camera")]
    pub cameras: Vec<CameraConfig>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrent stream sessions
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,

    /// Bytes requested from a session per pull
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Extra headers added to every stream response
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_clients: default_max_clients(),
            chunk_size: default_chunk_size(),
            headers: BTreeMap::new(),
        }
    }
}

/// Transcoding parameters shared by every stream session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Maximum frames per second delivered to a client
    #[serde(default = "default_max_rate")]
    pub max_rate: u32,

    /// Drop every view (not only the motion view) to 1 fps while no motion is detected
    #[serde(default)]
    pub motion_gating: bool,

    /// Codec name passed to the encoder factory
    #[serde(default = "default_codec")]
    pub codec: String,

    /// Keyframe interval in frames
    #[serde(default = "default_gop_size")]
    pub gop_size: u32,

    /// Target bitrate in bits per second
    #[serde(default = "default_bitrate")]
    pub bitrate: u32,

    /// Size of the muxer's output staging buffer
    #[serde(default = "default_io_buffer_size")]
    pub io_buffer_size: usize,

    /// Starting capacity of a session's output accumulator
    #[serde(default = "default_initial_output_capacity")]
    pub initial_output_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_rate: default_max_rate(),
            motion_gating: false,
            codec: default_codec(),
            gop_size: default_gop_size(),
            bitrate: default_bitrate(),
            io_buffer_size: default_io_buffer_size(),
            initial_output_capacity: default_initial_output_capacity(),
        }
    }
}

/// Layout of the aggregate (all cameras) view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicConfig {
    #[serde(default = "default_columns")]
    pub columns: usize,
}

impl Default for MosaicConfig {
    fn default() -> Self {
        Self {
            columns: default_columns(),
        }
    }
}

/// Where a camera's frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Synthetic moving-bar pattern, no hardware required
    Pattern,
    /// GStreamer capture (requires the `capture-gstreamer` feature)
    Gstreamer,
}

/// Per-camera configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera id used in URLs; 0 is reserved for the mosaic
    pub id: u32,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_source")]
    pub source: SourceKind,

    /// Device path for GStreamer capture, platform default when empty
    /// - macOS: "0" for first webcam
    /// - Raspberry Pi: "/base/axi/pcie@1000120000/rp1/i2c@88000/imx219@10"
    /// - Linux: "/dev/video0"
    #[serde(default)]
    pub device: String,

    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Per-pixel luma difference counted as change
    #[serde(default = "default_threshold")]
    pub threshold: u8,

    /// Changed pixels needed to report motion
    #[serde(default = "default_min_changed_pixels")]
    pub min_changed_pixels: usize,
}

impl CameraConfig {
    pub fn with_id(id: u32) -> Self {
        Self {
            id,
            name: format!("camera{}", id),
            source: default_source(),
            device: String::new(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            threshold: default_threshold(),
            min_changed_pixels: default_min_changed_pixels(),
        }
    }

    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("camera{}", self.id)
        } else {
            self.name.clone()
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8081
}
fn default_max_clients() -> usize {
    8
}
fn default_chunk_size() -> usize {
    4096
}
fn default_max_rate() -> u32 {
    15
}
fn default_codec() -> String {
    "h264".to_string()
}
fn default_gop_size() -> u32 {
    15
}
fn default_bitrate() -> u32 {
    400_000
}
fn default_io_buffer_size() -> usize {
    4096
}
fn default_initial_output_capacity() -> usize {
    4096
}
fn default_columns() -> usize {
    2
}
fn default_source() -> SourceKind {
    SourceKind::Pattern
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    15
}
fn default_threshold() -> u8 {
    24
}
fn default_min_changed_pixels() -> usize {
    1500
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
            mosaic: MosaicConfig::default(),
            cameras: vec![CameraConfig::with_id(1)],
        }
    }
}

impl Config {
    /// Loads configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn camera(&self, id: u32) -> Option<&CameraConfig> {
        self.cameras.iter().find(|c| c.id == id)
    }

    /// Validates configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let server = &self.server;
        if server.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be > 0".to_string()));
        }
        if server.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".to_string()));
        }
        for name in server.headers.keys() {
            if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
                return Err(ConfigError::Invalid(format!(
                    "invalid response header name '{}'",
                    name
                )));
            }
        }

        let stream = &self.stream;
        if stream.max_rate == 0 || stream.max_rate > 120 {
            return Err(ConfigError::Invalid(format!(
                "max_rate must be between 1 and 120, got {}",
                stream.max_rate
            )));
        }
        if stream.gop_size == 0 {
            return Err(ConfigError::Invalid("gop_size must be > 0".to_string()));
        }
        if stream.bitrate == 0 {
            return Err(ConfigError::Invalid("bitrate must be > 0".to_string()));
        }
        // One transport packet must fit the staging buffer
        if stream.io_buffer_size < 188 {
            return Err(ConfigError::Invalid(format!(
                "io_buffer_size must be at least 188, got {}",
                stream.io_buffer_size
            )));
        }

        if self.mosaic.columns == 0 {
            return Err(ConfigError::Invalid("mosaic columns must be > 0".to_string()));
        }

        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid("at least one camera is required".to_string()));
        }

        let mut seen = Vec::with_capacity(self.cameras.len());
        for cam in &self.cameras {
            if seen.contains(&cam.id) {
                return Err(ConfigError::Invalid(format!("duplicate camera id {}", cam.id)));
            }
            seen.push(cam.id);
            self.validate_camera(cam)?;
        }

        Ok(())
    }

    fn validate_camera(&self, cam: &CameraConfig) -> Result<(), ConfigError> {
        let name = cam.display_name();

        if cam.id == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: camera id 0 is reserved for the mosaic view",
                name
            )));
        }

        if cam.width == 0 || cam.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: width and height must be > 0",
                name
            )));
        }

        if cam.width % 8 != 0 || cam.height % 8 != 0 {
            return Err(ConfigError::Invalid(format!(
                "{}: width and height must be multiples of 8",
                name
            )));
        }

        if cam.fps == 0 || cam.fps > 120 {
            return Err(ConfigError::Invalid(format!(
                "{}: FPS must be between 1 and 120, got {}",
                name, cam.fps
            )));
        }

        Ok(())
    }
}
