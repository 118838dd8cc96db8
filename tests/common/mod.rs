//! Shared helpers for integration tests

#![allow(dead_code)]

use mpegts_streamer::codec::{
    Codec, EncodedPacket, EncoderError, EncoderFactory, EncoderParameters, EncoderSettings,
    VideoEncoder,
};
use mpegts_streamer::config::{CameraConfig, StreamConfig};
use mpegts_streamer::frame::CameraFeed;
use mpegts_streamer::stream::{Pull, StreamSession};
use mpegts_streamer::ts::{decode_timestamp, ParsedPacket, TS_PACKET_SIZE, VIDEO_PID};
use mpegts_streamer::Clock;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock that only moves when told to
pub struct ManualClock(Mutex<Instant>);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock()
    }
}

/// How a [`FakeEncoder`] behaves
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    /// Frames held back before the first packet comes out
    pub delay: usize,
    /// Size of every emitted packet
    pub payload_len: usize,
    /// Zero-based frame whose submit fails
    pub fail_submit_at: Option<u64>,
    /// Zero-based frame after which draining fails
    pub fail_drain_at: Option<u64>,
    /// Reject the open call
    pub fail_open: bool,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            delay: 0,
            payload_len: 1000,
            fail_submit_at: None,
            fail_drain_at: None,
            fail_open: false,
        }
    }
}

/// Scripted encoder emitting one synthetic H.264 packet per frame
pub struct FakeEncoder {
    params: EncoderParameters,
    behavior: FakeBehavior,
    queue: VecDeque<EncodedPacket>,
    submitted: u64,
    log: Arc<Mutex<Vec<i64>>>,
}

impl VideoEncoder for FakeEncoder {
    fn parameters(&self) -> &EncoderParameters {
        &self.params
    }

    fn submit(&mut self, frame: &[u8], pts: i64) -> Result<(), EncoderError> {
        let expected = self.params.size.frame_len();
        if frame.len() != expected {
            return Err(EncoderError::FrameSize {
                expected,
                actual: frame.len(),
            });
        }
        if self.behavior.fail_submit_at == Some(self.submitted) {
            return Err(EncoderError::Backend("scripted failure".to_string()));
        }

        let keyframe = self.submitted % self.params.gop_size as u64 == 0;
        let mut data = vec![0, 0, 0, 1, if keyframe { 0x65 } else { 0x41 }];
        data.resize(self.behavior.payload_len.max(data.len()), 0xAB);

        self.queue.push_back(EncodedPacket {
            data,
            pts,
            dts: pts,
            keyframe,
        });
        self.log.lock().push(pts);
        self.submitted += 1;
        Ok(())
    }

    fn drain(&mut self) -> Result<Option<EncodedPacket>, EncoderError> {
        let last = self.submitted.checked_sub(1);
        if last.is_some() && self.behavior.fail_drain_at == last {
            return Err(EncoderError::Backend("scripted drain failure".to_string()));
        }
        if self.queue.len() > self.behavior.delay {
            Ok(self.queue.pop_front())
        } else {
            Ok(None)
        }
    }
}

/// Factory for [`FakeEncoder`]s and the log of every pts they were given
pub fn fake_factory(behavior: FakeBehavior) -> (EncoderFactory, Arc<Mutex<Vec<i64>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&log);
    let factory: EncoderFactory = Arc::new(move |settings: &EncoderSettings| {
        if behavior.fail_open {
            return Err(EncoderError::Backend("scripted open failure".to_string()));
        }
        Ok(Box::new(FakeEncoder {
            params: EncoderParameters::for_settings(Codec::H264, settings),
            behavior: behavior.clone(),
            queue: VecDeque::new(),
            submitted: 0,
            log: Arc::clone(&shared),
        }) as Box<dyn VideoEncoder>)
    });
    (factory, log)
}

pub fn camera_feed(id: u32, width: u32, height: u32) -> Arc<CameraFeed> {
    let mut config = CameraConfig::with_id(id);
    config.width = width;
    config.height = height;
    Arc::new(CameraFeed::new(&config))
}

/// 10 fps so one frame interval is 100 ms
pub fn stream_config() -> StreamConfig {
    StreamConfig {
        max_rate: 10,
        ..StreamConfig::default()
    }
}

/// Pulls until `frames` frame cycles have run and their bytes are delivered
///
/// Pacing waits are satisfied by advancing `clock` by exactly the requested
/// amount.
pub fn pull_frames(
    session: &mut StreamSession,
    clock: &ManualClock,
    chunk: usize,
    frames: u64,
) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    for _ in 0..100_000 {
        match session.pull(&mut buf).unwrap() {
            Pull::Data(n) => out.extend_from_slice(&buf[..n]),
            Pull::Pending => {}
            Pull::Wait(wait) => {
                if session.stats().frames_encoded >= frames {
                    return out;
                }
                clock.advance(wait);
            }
            Pull::Finished => return out,
        }
    }
    panic!("stream did not reach {frames} frames");
}

/// Splits a byte stream into parsed transport packets
pub fn parse_packets(stream: &[u8]) -> Vec<ParsedPacket> {
    assert_eq!(stream.len() % TS_PACKET_SIZE, 0, "partial TS packet");
    stream
        .chunks(TS_PACKET_SIZE)
        .map(|p| ParsedPacket::parse(p).expect("malformed TS packet"))
        .collect()
}

/// PTS of every PES started on the video PID
pub fn video_pts(stream: &[u8]) -> Vec<u64> {
    stream
        .chunks(TS_PACKET_SIZE)
        .filter_map(|p| {
            let parsed = ParsedPacket::parse(p)?;
            if parsed.pid != VIDEO_PID || !parsed.payload_unit_start {
                return None;
            }
            let pes = &p[parsed.payload_offset..];
            assert_eq!(&pes[..4], &[0x00, 0x00, 0x01, 0xE0]);
            Some(decode_timestamp(&pes[9..14]))
        })
        .collect()
}
