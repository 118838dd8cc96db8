//! MPEG transport stream muxer
//!
//! Writes a single-program transport stream carrying one H.264 video stream:
//! - PAT on PID 0 and PMT on PID 0x1000, repeated before every keyframe and
//!   at least every 100 ms of stream time
//! - Video on PID 0x100, one PES per access unit, PCR on its first packet
//! - A fixed 0.7 s mux delay between PCR and PTS
//!
//! Bytes are staged in an I/O buffer and flushed to a [`MuxSink`] whenever the
//! buffer fills and at the end of every header or packet write.

mod crc;
mod packet;
mod pes;
mod psi;

pub use crc::crc32_mpeg2;
pub use packet::{AdaptationField, PacketHeader, ParsedPacket, TS_PACKET_SIZE};
pub use pes::{decode_timestamp, H264_AUD};

use bytes::BytesMut;
use std::collections::TryReserveError;
use thiserror::Error;
use tracing::trace;

use crate::codec::{rescale, Codec, EncodedPacket, EncoderParameters, Rational, MPEG_TIME_BASE};

pub const PAT_PID: u16 = 0x0000;
pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const PROGRAM_NUMBER: u16 = 1;

/// stream_type for H.264 video
pub const STREAM_TYPE_H264: u8 = 0x1B;

/// Delay added to PTS/DTS relative to PCR (0.7 s at 90 kHz)
pub const MUX_DELAY: u64 = 63_000;

/// Maximum stream time between PAT/PMT repetitions (100 ms at 90 kHz)
pub const PSI_INTERVAL: i64 = 9_000;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to grow output buffer to {needed} bytes: {source}")]
    Grow {
        needed: usize,
        #[source]
        source: TryReserveError,
    },
}

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("invalid stream parameters: {0}")]
    InvalidParameters(String),

    #[error("header has not been written")]
    HeaderNotWritten,

    #[error("output sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("short write to output sink: {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },
}

/// Destination of the muxer's output
pub trait MuxSink {
    /// Takes `data` and returns how many bytes were consumed
    fn append(&mut self, data: &[u8]) -> Result<usize, SinkError>;
}

impl MuxSink for Vec<u8> {
    fn append(&mut self, data: &[u8]) -> Result<usize, SinkError> {
        self.extend_from_slice(data);
        Ok(data.len())
    }
}

/// Muxer configuration
#[derive(Debug, Clone, Copy)]
pub struct MuxerConfig {
    /// Size of the staging buffer flushed to the sink
    pub io_buffer_size: usize,
}

impl Default for MuxerConfig {
    fn default() -> Self {
        Self {
            io_buffer_size: 4096,
        }
    }
}

/// Fixed-size staging buffer in front of the sink
#[derive(Debug)]
struct IoBuffer {
    buf: Vec<u8>,
    size: usize,
}

impl IoBuffer {
    fn new(size: usize) -> Self {
        let size = size.max(TS_PACKET_SIZE);
        Self {
            buf: Vec::with_capacity(size),
            size,
        }
    }

    fn write(&mut self, mut data: &[u8], sink: &mut dyn MuxSink) -> Result<(), MuxError> {
        while !data.is_empty() {
            let n = (self.size - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.buf.len() == self.size {
                self.flush(sink)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self, sink: &mut dyn MuxSink) -> Result<(), MuxError> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let expected = self.buf.len();
        let written = sink.append(&self.buf)?;
        self.buf.clear();
        if written != expected {
            return Err(MuxError::ShortWrite { expected, written });
        }
        Ok(())
    }
}

/// Muxer statistics
#[derive(Debug, Clone, Copy, Default)]
pub struct MuxerStats {
    pub packets_written: u64,
    pub ts_packets_written: u64,
    pub psi_repetitions: u64,
}

/// Single-program MPEG-TS writer
#[derive(Debug)]
pub struct TsMuxer {
    // Field order is drop order: staging buffer before stream state
    io: IoBuffer,
    codec: Codec,
    stream_type: u8,
    time_base: Rational,
    continuity: [u8; 3],
    header_written: bool,
    last_psi_dts: Option<i64>,
    scratch: BytesMut,
    stats: MuxerStats,
}

impl TsMuxer {
    /// Creates a muxer for the stream described by the encoder's parameters
    pub fn new(params: &EncoderParameters, config: MuxerConfig) -> Result<Self, MuxError> {
        let stream_type = match params.codec {
            Codec::H264 => STREAM_TYPE_H264,
        };
        if params.size.width == 0 || params.size.height == 0 {
            return Err(MuxError::InvalidParameters(format!(
                "picture size {}",
                params.size
            )));
        }
        if !params.time_base.is_valid() {
            return Err(MuxError::InvalidParameters(format!(
                "time base {}",
                params.time_base
            )));
        }

        Ok(Self {
            io: IoBuffer::new(config.io_buffer_size),
            codec: params.codec,
            stream_type,
            time_base: params.time_base,
            continuity: [0; 3],
            header_written: false,
            last_psi_dts: None,
            scratch: BytesMut::with_capacity(64 * 1024),
            stats: MuxerStats::default(),
        })
    }

    pub fn stats(&self) -> MuxerStats {
        self.stats
    }

    /// Writes the stream header (PAT + PMT)
    pub fn write_header(&mut self, sink: &mut dyn MuxSink) -> Result<(), MuxError> {
        self.write_psi(sink)?;
        self.io.flush(sink)?;
        self.header_written = true;
        Ok(())
    }

    /// Writes one compressed packet as a PES
    ///
    /// Timestamps are taken from the packet as-is and converted from the
    /// encoder time base to 90 kHz.
    pub fn write_packet(
        &mut self,
        packet: &EncodedPacket,
        sink: &mut dyn MuxSink,
    ) -> Result<(), MuxError> {
        if !self.header_written {
            return Err(MuxError::HeaderNotWritten);
        }

        let dts = rescale(packet.dts, self.time_base, MPEG_TIME_BASE);
        let pts = rescale(packet.pts, self.time_base, MPEG_TIME_BASE).max(dts);

        let psi_due = match self.last_psi_dts {
            None => true,
            Some(last) => packet.keyframe || dts - last >= PSI_INTERVAL,
        };
        if psi_due {
            if self.last_psi_dts.is_some() {
                self.stats.psi_repetitions += 1;
            }
            self.write_psi(sink)?;
            self.last_psi_dts = Some(dts);
        }

        let pcr = dts.max(0) as u64;
        let mut buf = std::mem::take(&mut self.scratch);
        buf.clear();
        pes::write_header(&mut buf, pcr + MUX_DELAY + (pts - dts) as u64, pcr + MUX_DELAY);
        if self.codec == Codec::H264 && !pes::starts_with_aud(&packet.data) {
            buf.extend_from_slice(&H264_AUD);
        }
        buf.extend_from_slice(&packet.data);

        let result = self.write_pes(&buf, pcr, packet.keyframe, sink);
        self.scratch = buf;
        result?;

        self.io.flush(sink)?;
        self.stats.packets_written += 1;
        trace!(
            pts,
            dts,
            keyframe = packet.keyframe,
            bytes = packet.data.len(),
            "Muxed packet"
        );
        Ok(())
    }

    fn write_pes(
        &mut self,
        mut pes: &[u8],
        pcr: u64,
        keyframe: bool,
        sink: &mut dyn MuxSink,
    ) -> Result<(), MuxError> {
        let mut first = true;
        let mut out = [0u8; TS_PACKET_SIZE];
        while !pes.is_empty() {
            let af = if first {
                AdaptationField {
                    random_access: keyframe,
                    pcr: Some(pcr),
                }
            } else {
                AdaptationField::default()
            };
            let header = PacketHeader {
                pid: VIDEO_PID,
                payload_unit_start: first,
                continuity_counter: self.next_continuity(VIDEO_PID),
            };
            let used = packet::write_packet(&mut out, header, af, pes);
            self.io.write(&out, sink)?;
            self.stats.ts_packets_written += 1;
            pes = &pes[used..];
            first = false;
        }
        Ok(())
    }

    fn write_psi(&mut self, sink: &mut dyn MuxSink) -> Result<(), MuxError> {
        let pat = psi::pat_section(PROGRAM_NUMBER, PMT_PID);
        let pmt = psi::pmt_section(PROGRAM_NUMBER, VIDEO_PID, self.stream_type, VIDEO_PID);

        let mut out = [0u8; TS_PACKET_SIZE];
        for (pid, section) in [(PAT_PID, pat), (PMT_PID, pmt)] {
            let header = PacketHeader {
                pid,
                payload_unit_start: true,
                continuity_counter: self.next_continuity(pid),
            };
            let payload = psi::section_payload(&section);
            packet::write_packet(&mut out, header, AdaptationField::default(), &payload);
            self.io.write(&out, sink)?;
            self.stats.ts_packets_written += 1;
        }
        Ok(())
    }

    /// Returns the counter for this packet and advances it
    fn next_continuity(&mut self, pid: u16) -> u8 {
        let slot = match pid {
            PAT_PID => &mut self.continuity[0],
            PMT_PID => &mut self.continuity[1],
            _ => &mut self.continuity[2],
        };
        let cc = *slot;
        *slot = (cc + 1) & 0x0F;
        cc
    }
}
