//! Encoder + muxer pair owned by one stream session

use tracing::debug;

use super::StreamError;
use crate::codec::{EncoderFactory, EncoderSettings, VideoEncoder};
use crate::frame::PictureSize;
use crate::ts::{MuxError, MuxSink, MuxerConfig, TsMuxer};

/// Raw picture buffer reused for every frame of a session
///
/// The layout (size, plane lengths) is fixed when the session opens; only the
/// pixel payload changes between frames.
#[derive(Debug)]
struct Picture {
    size: PictureSize,
    data: Vec<u8>,
}

/// Encoder and transport-stream muxer created and destroyed together
///
/// Construction either yields both halves or nothing. Fields drop in
/// declaration order: picture, encoder, muxer staging buffer, muxer state.
pub struct Transcoder {
    picture: Picture,
    encoder: Box<dyn VideoEncoder>,
    muxer: TsMuxer,
}

impl Transcoder {
    /// Opens the encoder, binds a muxer to its parameters and writes the
    /// stream header into `sink`
    pub fn open(
        settings: &EncoderSettings,
        factory: &EncoderFactory,
        mux_config: MuxerConfig,
        sink: &mut dyn MuxSink,
    ) -> Result<Self, StreamError> {
        let encoder = factory(settings).map_err(|source| StreamError::Encoder {
            op: "open encoder",
            source,
        })?;

        let mut muxer = TsMuxer::new(encoder.parameters(), mux_config)
            .map_err(|e| mux_error("copy parameters", e))?;

        muxer
            .write_header(sink)
            .map_err(|e| mux_error("write header", e))?;

        debug!(size = %settings.size, codec = %settings.codec, "Transcoder opened");

        Ok(Self {
            picture: Picture {
                size: settings.size,
                data: Vec::with_capacity(settings.size.frame_len()),
            },
            encoder,
            muxer,
        })
    }

    pub fn size(&self) -> PictureSize {
        self.picture.size
    }

    /// Encoder time base
    pub fn time_base(&self) -> crate::codec::Rational {
        self.encoder.parameters().time_base
    }

    /// Buffer the next frame is acquired into
    pub fn picture_mut(&mut self) -> &mut Vec<u8> {
        &mut self.picture.data
    }

    /// Encodes the current picture stamped `pts` and muxes every packet the
    /// encoder releases into `sink`
    ///
    /// Packets are restamped with `pts`. Returns the number of packets muxed,
    /// which is zero while the encoder is still buffering.
    pub fn encode_picture(
        &mut self,
        pts: i64,
        sink: &mut dyn MuxSink,
    ) -> Result<usize, StreamError> {
        self.encoder
            .submit(&self.picture.data, pts)
            .map_err(|source| StreamError::Encoder {
                op: "send frame",
                source,
            })?;

        let mut packets = 0;
        loop {
            let packet = self.encoder.drain().map_err(|source| StreamError::Encoder {
                op: "receive packet",
                source,
            })?;
            let Some(mut packet) = packet else {
                break;
            };

            packet.pts = pts;
            packet.dts = pts;
            self.muxer
                .write_packet(&packet, sink)
                .map_err(|e| mux_error("write packet", e))?;
            packets += 1;
        }

        Ok(packets)
    }
}

impl Drop for Transcoder {
    fn drop(&mut self) {
        let stats = self.muxer.stats();
        debug!(
            packets = stats.packets_written,
            ts_packets = stats.ts_packets_written,
            "Transcoder closed"
        );
    }
}

/// Output growth failures are reported as their own operation
fn mux_error(op: &'static str, e: MuxError) -> StreamError {
    let op = match e {
        MuxError::Sink(_) => "grow output",
        _ => op,
    };
    StreamError::Mux { op, source: e }
}
