//! Pull-driven H.264 / MPEG-TS live view server for surveillance cameras
//!
//! Each HTTP client gets its own stream session that transcodes the latest raw
//! camera frame into an MPEG transport stream, one frame per pull cycle:
//! - Frame acquisition under a short-lived per-camera lock
//! - H.264 encoding through the [`codec::VideoEncoder`] seam (OpenH264 by default)
//! - A hand-rolled transport-stream muxer writing into a growable accumulator
//! - Motion-gated pacing that drops to 1 fps while nothing moves
//!
//! # Example
//!
//! ```no_run
//! use mpegts_streamer::codec::default_factory;
//! use mpegts_streamer::config::{CameraConfig, StreamConfig};
//! use mpegts_streamer::frame::{CameraFeed, StreamView};
//! use mpegts_streamer::stream::{Pull, SessionContext, SessionSource, StreamSession};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), mpegts_streamer::StreamError> {
//! let feed = Arc::new(CameraFeed::new(&CameraConfig::with_id(1)));
//! let mut session = StreamSession::open(
//!     SessionContext::new(1),
//!     SessionSource::Camera(feed),
//!     StreamView::Full,
//!     &StreamConfig::default(),
//!     &default_factory(),
//! )?;
//!
//! let mut buf = [0u8; 4096];
//! match session.pull(&mut buf)? {
//!     Pull::Data(n) => println!("{n} bytes of transport stream"),
//!     Pull::Wait(wait) => println!("next frame in {wait:?}"),
//!     Pull::Pending | Pull::Finished => {}
//! }
//! # Ok(())
//! # }
//! ```

pub mod capture;
pub mod clock;
pub mod codec;
pub mod config;
pub mod frame;
pub mod motion;
pub mod server;
pub mod stream;
pub mod ts;

// Re-exports for convenience
pub use clock::{Clock, SystemClock};
pub use codec::{EncodedPacket, EncoderError, EncoderFactory, EncoderSettings, VideoEncoder};
pub use frame::{CameraFeed, Mosaic, PictureSize, StreamView};
pub use stream::{Pull, StreamControl, StreamError, StreamRegistry, StreamSession};
pub use ts::{MuxError, MuxSink, TsMuxer};
