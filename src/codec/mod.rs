//! Video encoder stage
//!
//! [`VideoEncoder`] is the seam between a stream session and the compression
//! library. An encoder accepts one raw I420 frame at a time through
//! [`VideoEncoder::submit`] and hands back compressed packets through
//! [`VideoEncoder::drain`], where `Ok(None)` means it needs more input first.

#[cfg(feature = "openh264")]
mod h264;
pub mod timebase;

#[cfg(feature = "openh264")]
pub use h264::OpenH264Encoder;
pub use timebase::{rescale, Rational, MPEG_TIME_BASE};

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::StreamConfig;
use crate::frame::PictureSize;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("unsupported codec '{0}'")]
    UnsupportedCodec(String),

    #[error("codec '{0}' is not compiled into this build")]
    Unavailable(String),

    #[error("invalid encoder settings: {0}")]
    InvalidSettings(String),

    #[error("frame rejected: expected {expected} bytes, got {actual}")]
    FrameSize { expected: usize, actual: usize },

    #[error("encoder error: {0}")]
    Backend(String),
}

/// Compressed video formats the pipeline can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Codec {
    H264,
}

impl Codec {
    /// Resolves a configured codec name
    pub fn from_name(name: &str) -> Result<Self, EncoderError> {
        match name.to_ascii_lowercase().as_str() {
            "h264" | "avc" | "openh264" | "libx264" => Ok(Self::H264),
            _ => Err(EncoderError::UnsupportedCodec(name.to_string())),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("h264"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PixelFormat {
    /// Planar 4:2:0, Y then U then V
    I420,
}

/// What a session asks of its encoder
#[derive(Debug, Clone)]
pub struct EncoderSettings {
    pub codec: String,
    pub size: PictureSize,
    pub frame_rate: u32,
    pub gop_size: u32,
    pub bitrate: u32,
}

impl EncoderSettings {
    pub fn new(config: &StreamConfig, size: PictureSize) -> Self {
        Self {
            codec: config.codec.clone(),
            size,
            frame_rate: config.max_rate,
            gop_size: config.gop_size,
            bitrate: config.bitrate,
        }
    }
}

/// Parameters of an opened encoder, copied into the container stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncoderParameters {
    pub codec: Codec,
    pub size: PictureSize,
    pub pixel_format: PixelFormat,
    pub time_base: Rational,
    pub gop_size: u32,
    pub bitrate: u32,
    /// Out-of-band codec headers; always false, SPS/PPS travel in-band
    pub global_header: bool,
}

impl EncoderParameters {
    /// Parameters every backend reports for `settings`
    pub fn for_settings(codec: Codec, settings: &EncoderSettings) -> Self {
        Self {
            codec,
            size: settings.size,
            pixel_format: PixelFormat::I420,
            time_base: MPEG_TIME_BASE,
            gop_size: settings.gop_size,
            bitrate: settings.bitrate,
            global_header: false,
        }
    }
}

/// One compressed access unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,
    /// Presentation timestamp in the encoder's time base
    pub pts: i64,
    /// Decode timestamp in the encoder's time base
    pub dts: i64,
    pub keyframe: bool,
}

/// Stateful video encoder
pub trait VideoEncoder: Send {
    /// Parameters fixed when the encoder was opened
    fn parameters(&self) -> &EncoderParameters;

    /// Queues one raw frame stamped with `pts` (encoder time base)
    fn submit(&mut self, frame: &[u8], pts: i64) -> Result<(), EncoderError>;

    /// Returns the next compressed packet, or `None` if the encoder needs more input
    fn drain(&mut self) -> Result<Option<EncodedPacket>, EncoderError>;
}

/// Opens an encoder for the given settings
pub type EncoderFactory =
    Arc<dyn Fn(&EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError> + Send + Sync>;

/// Factory opening the encoders compiled into this build
pub fn default_factory() -> EncoderFactory {
    Arc::new(open)
}

/// Opens the encoder named by `settings.codec`
pub fn open(settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError> {
    if settings.size.width == 0 || settings.size.height == 0 {
        return Err(EncoderError::InvalidSettings(format!(
            "picture size {}",
            settings.size
        )));
    }
    if settings.size.width % 2 != 0 || settings.size.height % 2 != 0 {
        return Err(EncoderError::InvalidSettings(format!(
            "picture size {} is not even",
            settings.size
        )));
    }

    match Codec::from_name(&settings.codec)? {
        Codec::H264 => open_h264(settings),
    }
}

#[cfg(feature = "openh264")]
fn open_h264(settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError> {
    Ok(Box::new(OpenH264Encoder::new(settings)?))
}

#[cfg(not(feature = "openh264"))]
fn open_h264(settings: &EncoderSettings) -> Result<Box<dyn VideoEncoder>, EncoderError> {
    Err(EncoderError::Unavailable(settings.codec.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(codec: &str, width: u32, height: u32) -> EncoderSettings {
        EncoderSettings {
            codec: codec.to_string(),
            size: PictureSize::new(width, height),
            frame_rate: 15,
            gop_size: 15,
            bitrate: 400_000,
        }
    }

    #[test]
    fn test_codec_from_name() {
        assert_eq!(Codec::from_name("h264").unwrap(), Codec::H264);
        assert_eq!(Codec::from_name("H264").unwrap(), Codec::H264);
        assert_eq!(Codec::from_name("libx264").unwrap(), Codec::H264);
        assert!(matches!(
            Codec::from_name("vp9"),
            Err(EncoderError::UnsupportedCodec(name)) if name == "vp9"
        ));
    }

    #[test]
    fn test_settings_from_config() {
        let config = StreamConfig::default();
        let settings = EncoderSettings::new(&config, PictureSize::new(320, 240));
        assert_eq!(settings.gop_size, 15);
        assert_eq!(settings.bitrate, 400_000);
        assert_eq!(settings.frame_rate, config.max_rate);

        let params = EncoderParameters::for_settings(Codec::H264, &settings);
        assert_eq!(params.time_base, MPEG_TIME_BASE);
        assert_eq!(params.pixel_format, PixelFormat::I420);
        assert!(!params.global_header);
    }

    #[test]
    fn test_open_rejects_bad_settings() {
        assert!(matches!(
            open(&settings("vp9", 320, 240)),
            Err(EncoderError::UnsupportedCodec(_))
        ));
        assert!(matches!(
            open(&settings("h264", 0, 240)),
            Err(EncoderError::InvalidSettings(_))
        ));
        assert!(matches!(
            open(&settings("h264", 321, 240)),
            Err(EncoderError::InvalidSettings(_))
        ));
    }
}
