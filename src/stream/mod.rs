//! Stream sessions and the pull responder
//!
//! A [`StreamSession`] turns the frames of one camera view into a transport
//! stream for one client. The HTTP layer drives it by calling
//! [`StreamSession::pull`] whenever it wants more bytes; each call advances a
//! two-state machine:
//!
//! ```text
//!   AwaitFrame --(pacing ok, frame cycle produced bytes)--> Delivering
//!   Delivering --(cursor reached used)--> AwaitFrame
//! ```
//!
//! A frame cycle acquires one raw frame, encodes it, and muxes every packet
//! the encoder releases into the session's [`OutputAccumulator`].

mod accumulator;
mod acquire;
mod pacing;
mod registry;
mod stats;
mod transcoder;

pub use accumulator::OutputAccumulator;
pub use acquire::{FrameAcquirer, SessionSource};
pub use pacing::{frame_interval, Pacer, IDLE_INTERVAL};
pub use registry::{SessionTicket, StreamInfo, StreamRegistry};
pub use stats::{SessionStats, StatsSnapshot};
pub use transcoder::Transcoder;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::{timebase, EncoderError, EncoderFactory, EncoderSettings};
use crate::config::StreamConfig;
use crate::frame::{AcquireError, StreamView};
use crate::ts::{MuxError, MuxerConfig};

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("view '{view}' is not available for camera {camera}")]
    ViewUnavailable { camera: u32, view: StreamView },

    #[error("frame acquisition failed: {0}")]
    Acquire(#[from] AcquireError),

    #[error("{op} failed: {source}")]
    Encoder {
        op: &'static str,
        #[source]
        source: EncoderError,
    },

    #[error("{op} failed: {source}")]
    Mux {
        op: &'static str,
        #[source]
        source: MuxError,
    },

    #[error("session is closed")]
    Closed,
}

impl StreamError {
    /// Recoverable errors cost one frame cycle; everything else ends the session
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Acquire(_))
    }

    /// Name of the codec or muxer operation that failed
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            Self::Encoder { op, .. } | Self::Mux { op, .. } => Some(*op),
            _ => None,
        }
    }
}

/// Outcome of one pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    /// This many bytes were copied into the caller's buffer
    Data(usize),
    /// No bytes this cycle; pull again
    Pending,
    /// Too early for the next frame; pull again after this long
    Wait(Duration),
    /// End of stream; close the connection
    Finished,
}

/// Process-wide stream shutdown flag
#[derive(Debug, Default)]
pub struct StreamControl {
    shutdown: AtomicBool,
}

impl StreamControl {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ends every open stream at its next pull
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

/// Collaborators a session needs besides its source and configuration
#[derive(Clone)]
pub struct SessionContext {
    pub id: u64,
    pub clock: Arc<dyn Clock>,
    pub control: Arc<StreamControl>,
    pub stats: Arc<SessionStats>,
}

impl SessionContext {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            clock: Arc::new(SystemClock),
            control: StreamControl::new(),
            stats: Arc::new(SessionStats::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_control(mut self, control: Arc<StreamControl>) -> Self {
        self.control = control;
        self
    }

    pub fn with_stats(mut self, stats: Arc<SessionStats>) -> Self {
        self.stats = stats;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Accumulator empty; the next pull runs a frame cycle
    AwaitFrame,
    /// Accumulator holds undelivered bytes
    Delivering,
}

/// One client's transcoding pipeline
pub struct StreamSession {
    id: u64,
    acquirer: FrameAcquirer,
    transcoder: Option<Transcoder>,
    output: OutputAccumulator,
    state: DeliveryState,
    pacer: Pacer,
    started_at: Instant,
    max_rate: u32,
    motion_gating: bool,
    clock: Arc<dyn Clock>,
    control: Arc<StreamControl>,
    stats: Arc<SessionStats>,
}

impl StreamSession {
    /// Opens the encoder and muxer for `view` of `source` and writes the
    /// stream header into the output buffer
    pub fn open(
        ctx: SessionContext,
        source: SessionSource,
        view: StreamView,
        config: &StreamConfig,
        factory: &EncoderFactory,
    ) -> Result<Self, StreamError> {
        let camera = source.camera_id();
        let acquirer = FrameAcquirer::new(source, view)
            .ok_or(StreamError::ViewUnavailable { camera, view })?;

        let settings = EncoderSettings::new(config, acquirer.size());
        let mux_config = MuxerConfig {
            io_buffer_size: config.io_buffer_size,
        };
        let mut output = OutputAccumulator::new(config.initial_output_capacity);

        let transcoder = Transcoder::open(&settings, factory, mux_config, &mut output)
            .map_err(|e| {
                error!(
                    session_id = ctx.id,
                    camera,
                    view = %view,
                    op = e.operation().unwrap_or("open"),
                    error = %e,
                    "Failed to open stream session"
                );
                e
            })?;

        let state = if output.is_empty() {
            DeliveryState::AwaitFrame
        } else {
            DeliveryState::Delivering
        };
        ctx.stats.record_output(output.growths(), output.capacity());

        info!(
            session_id = ctx.id,
            camera,
            view = %view,
            size = %acquirer.size(),
            header_bytes = output.used(),
            "Stream session opened"
        );

        Ok(Self {
            id: ctx.id,
            acquirer,
            transcoder: Some(transcoder),
            output,
            state,
            pacer: Pacer::new(),
            started_at: ctx.clock.now(),
            max_rate: config.max_rate,
            motion_gating: config.motion_gating,
            clock: ctx.clock,
            control: ctx.control,
            stats: ctx.stats,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn view(&self) -> StreamView {
        self.acquirer.view()
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.transcoder.is_some()
    }

    pub fn output(&self) -> &OutputAccumulator {
        &self.output
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Interval the next frame cycle is paced to
    pub fn target_interval(&self) -> Duration {
        frame_interval(
            self.acquirer.view(),
            self.motion_gating,
            self.acquirer.source().motion_active(),
            self.max_rate,
        )
    }

    /// Copies the next bytes of the stream into `out`
    ///
    /// Runs a frame cycle first when no undelivered bytes remain. Fatal
    /// errors close the session before they are returned.
    pub fn pull(&mut self, out: &mut [u8]) -> Result<Pull, StreamError> {
        if self.end_of_stream() {
            self.output.reset();
            self.state = DeliveryState::AwaitFrame;
            return Ok(Pull::Finished);
        }
        if self.transcoder.is_none() {
            return Err(StreamError::Closed);
        }

        if self.state == DeliveryState::AwaitFrame {
            let now = self.clock.now();
            if let Some(wait) = self.pacer.remaining(now, self.target_interval()) {
                return Ok(Pull::Wait(wait));
            }
            self.pacer.mark(now);
            self.output.reset();

            match self.frame_cycle(now) {
                Ok(()) => {}
                Err(e) if e.is_recoverable() => {
                    warn!(session_id = self.id, error = %e, "Frame cycle skipped");
                    self.output.reset();
                    self.stats.record_pending();
                    return Ok(Pull::Pending);
                }
                Err(e) => {
                    error!(
                        session_id = self.id,
                        op = e.operation().unwrap_or("frame cycle"),
                        error = %e,
                        "Stream session failed"
                    );
                    self.close();
                    return Err(e);
                }
            }

            if self.output.is_empty() {
                self.stats.record_pending();
                return Ok(Pull::Pending);
            }
            self.state = DeliveryState::Delivering;
        }

        let n = self.output.deliver(out);
        self.stats.record_delivered(n);
        if self.output.is_drained() {
            self.output.reset();
            self.state = DeliveryState::AwaitFrame;
        }
        Ok(Pull::Data(n))
    }

    /// Acquires, encodes and muxes one frame into the output buffer
    fn frame_cycle(&mut self, now: Instant) -> Result<(), StreamError> {
        let transcoder = self.transcoder.as_mut().ok_or(StreamError::Closed)?;

        self.acquirer.acquire(transcoder.picture_mut())?;

        let elapsed = now.saturating_duration_since(self.started_at);
        let pts = timebase::from_elapsed(elapsed, transcoder.time_base());
        let packets = transcoder.encode_picture(pts, &mut self.output)?;

        self.stats.record_frame(packets);
        self.stats
            .record_output(self.output.growths(), self.output.capacity());
        Ok(())
    }

    fn end_of_stream(&self) -> bool {
        self.control.is_shutdown() || self.acquirer.source().is_stopped()
    }

    /// Releases the encoder and muxer; later calls do nothing
    pub fn close(&mut self) {
        if let Some(transcoder) = self.transcoder.take() {
            drop(transcoder);
            self.output.reset();
            self.state = DeliveryState::AwaitFrame;
            let stats = self.stats.snapshot();
            info!(
                session_id = self.id,
                frames = stats.frames_encoded,
                bytes = stats.bytes_delivered,
                "Stream session closed"
            );
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
