//! OpenH264 software encoder backend

use openh264::encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, UsageType};
use openh264::formats::YUVSource;
use openh264::OpenH264API;
use std::collections::VecDeque;
use tracing::debug;

use super::{Codec, EncodedPacket, EncoderError, EncoderParameters, EncoderSettings, VideoEncoder};
use crate::frame::PictureSize;

/// H.264 encoder tuned for real-time camera streaming
///
/// OpenH264 encodes synchronously, so every submitted frame yields at most one
/// access unit; skipped frames yield none. SPS/PPS are emitted in-band with
/// each IDR frame.
pub struct OpenH264Encoder {
    encoder: Encoder,
    params: EncoderParameters,
    layout: I420Layout,
    frames_since_idr: u32,
    pending: VecDeque<EncodedPacket>,
}

impl OpenH264Encoder {
    pub fn new(settings: &EncoderSettings) -> Result<Self, EncoderError> {
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(settings.bitrate))
            .max_frame_rate(FrameRate::from_hz(settings.frame_rate.max(1) as f32))
            .usage_type(UsageType::CameraVideoRealTime);

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config)
            .map_err(|e| EncoderError::Backend(e.to_string()))?;

        debug!(
            size = %settings.size,
            bitrate = settings.bitrate,
            gop = settings.gop_size,
            "OpenH264 encoder opened"
        );

        Ok(Self {
            encoder,
            params: EncoderParameters::for_settings(Codec::H264, settings),
            layout: I420Layout::new(settings.size),
            frames_since_idr: 0,
            pending: VecDeque::new(),
        })
    }
}

/// Plane geometry of a packed I420 picture, fixed for the life of an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct I420Layout {
    width: usize,
    height: usize,
    luma_len: usize,
    chroma_len: usize,
}

impl I420Layout {
    fn new(size: PictureSize) -> Self {
        Self {
            width: size.width as usize,
            height: size.height as usize,
            luma_len: size.luma_len(),
            chroma_len: size.chroma_len(),
        }
    }

    fn frame_len(&self) -> usize {
        self.luma_len + 2 * self.chroma_len
    }

    /// Borrows `frame` as an encoder input without copying it
    fn wrap<'a>(&'a self, frame: &'a [u8]) -> I420Frame<'a> {
        I420Frame { layout: self, data: frame }
    }
}

struct I420Frame<'a> {
    layout: &'a I420Layout,
    data: &'a [u8],
}

impl YUVSource for I420Frame<'_> {
    fn dimensions(&self) -> (usize, usize) {
        (self.layout.width, self.layout.height)
    }

    fn strides(&self) -> (usize, usize, usize) {
        let chroma = self.layout.width / 2;
        (self.layout.width, chroma, chroma)
    }

    fn y(&self) -> &[u8] {
        &self.data[..self.layout.luma_len]
    }

    fn u(&self) -> &[u8] {
        let start = self.layout.luma_len;
        &self.data[start..start + self.layout.chroma_len]
    }

    fn v(&self) -> &[u8] {
        let start = self.layout.luma_len + self.layout.chroma_len;
        &self.data[start..start + self.layout.chroma_len]
    }
}

impl VideoEncoder for OpenH264Encoder {
    fn parameters(&self) -> &EncoderParameters {
        &self.params
    }

    fn submit(&mut self, frame: &[u8], pts: i64) -> Result<(), EncoderError> {
        if frame.len() != self.layout.frame_len() {
            return Err(EncoderError::FrameSize {
                expected: self.layout.frame_len(),
                actual: frame.len(),
            });
        }

        if self.frames_since_idr >= self.params.gop_size {
            self.encoder.force_intra_frame();
            self.frames_since_idr = 0;
        }

        let bitstream = self
            .encoder
            .encode(&self.layout.wrap(frame))
            .map_err(|e| EncoderError::Backend(e.to_string()))?;

        let frame_type = bitstream.frame_type();
        if matches!(frame_type, FrameType::Skip | FrameType::Invalid) {
            return Ok(());
        }

        let keyframe = matches!(frame_type, FrameType::IDR | FrameType::I);
        if keyframe {
            self.frames_since_idr = 0;
        }
        self.frames_since_idr += 1;

        let data = bitstream.to_vec();
        if !data.is_empty() {
            self.pending.push_back(EncodedPacket {
                data,
                pts,
                dts: pts,
                keyframe,
            });
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<Option<EncodedPacket>, EncoderError> {
        Ok(self.pending.pop_front())
    }
}
