//! Capture threads feeding raw frames into the shared camera buffers
//!
//! Each camera gets one thread that pulls I420 frames from a
//! [`FrameProducer`], publishes them into its [`CameraFeed`] (full, source and
//! reduced views), and runs motion detection to refresh the motion and
//! secondary views.

mod pattern;

#[cfg(feature = "capture-gstreamer")]
mod gst_source;
#[cfg(feature = "capture-gstreamer")]
mod platform;

#[cfg(feature = "capture-gstreamer")]
pub use gst_source::GstSource;
#[cfg(feature = "capture-gstreamer")]
pub use platform::CaptureHost;
pub use pattern::PatternSource;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{CameraConfig, SourceKind};
use crate::frame::{downscale_half, CameraFeed, StreamView};
use crate::motion::MotionDetector;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[cfg(feature = "capture-gstreamer")]
    #[error("GStreamer error: {0}")]
    Gst(#[from] ::gstreamer::glib::Error),

    #[cfg(feature = "capture-gstreamer")]
    #[error("GStreamer bool error: {0}")]
    GstBool(#[from] ::gstreamer::glib::BoolError),

    #[error("state change error: {0}")]
    StateChange(String),

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("capture source '{0}' is not available in this build")]
    Unsupported(&'static str),

    #[error("failed to spawn capture thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Source of raw I420 frames
pub trait FrameProducer: Send {
    /// Writes the next frame into `frame`
    ///
    /// Returns `Ok(false)` when no frame arrived within the producer's poll
    /// interval; the capture loop then checks its stop flag and retries.
    fn next_frame(&mut self, frame: &mut Vec<u8>) -> Result<bool, CaptureError>;
}

/// Capture statistics
#[derive(Debug, Clone, Default)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub is_running: bool,
}

/// Running capture thread for one camera
///
/// Dropping the handle stops the thread and marks the camera stopped.
pub struct CaptureHandle {
    camera: u32,
    running: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    drop_count: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn get_stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.frame_count.load(Ordering::Relaxed),
            frames_dropped: self.drop_count.load(Ordering::Relaxed),
            is_running: self.running.load(Ordering::Relaxed),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!(camera = self.camera, "Capture thread panicked");
            }
            let stats = self.get_stats();
            info!(
                camera = self.camera,
                frames = %stats.frames_captured,
                dropped = %stats.frames_dropped,
                "Capture stopped"
            );
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens the configured source for `config` and starts its capture thread
pub fn spawn(config: &CameraConfig, feed: Arc<CameraFeed>) -> Result<CaptureHandle, CaptureError> {
    let producer: Box<dyn FrameProducer> = match config.source {
        SourceKind::Pattern => Box::new(PatternSource::new(config)),
        SourceKind::Gstreamer => open_gstreamer(config)?,
    };
    spawn_with(config, feed, producer)
}

#[cfg(feature = "capture-gstreamer")]
fn open_gstreamer(config: &CameraConfig) -> Result<Box<dyn FrameProducer>, CaptureError> {
    Ok(Box::new(GstSource::new(config)?))
}

#[cfg(not(feature = "capture-gstreamer"))]
fn open_gstreamer(_config: &CameraConfig) -> Result<Box<dyn FrameProducer>, CaptureError> {
    Err(CaptureError::Unsupported("gstreamer"))
}

/// Starts a capture thread pulling from `producer`
pub fn spawn_with(
    config: &CameraConfig,
    feed: Arc<CameraFeed>,
    mut producer: Box<dyn FrameProducer>,
) -> Result<CaptureHandle, CaptureError> {
    let running = Arc::new(AtomicBool::new(true));
    let frame_count = Arc::new(AtomicU64::new(0));
    let drop_count = Arc::new(AtomicU64::new(0));
    let mut detector = MotionDetector::new(config);

    info!(
        camera = config.id,
        name = %config.display_name(),
        resolution = %feed.size(),
        fps = %config.fps,
        source = ?config.source,
        "Starting capture"
    );

    let thread = {
        let running = Arc::clone(&running);
        let frame_count = Arc::clone(&frame_count);
        let drop_count = Arc::clone(&drop_count);
        std::thread::Builder::new()
            .name(format!("capture-{}", config.id))
            .spawn(move || {
                let expected = feed.size().frame_len();
                let mut frame = Vec::with_capacity(expected);
                let mut reduced = Vec::new();

                while running.load(Ordering::Relaxed) {
                    match producer.next_frame(&mut frame) {
                        Ok(true) if frame.len() == expected => {
                            publish_frame(&feed, &mut detector, &frame, &mut reduced);
                            frame_count.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(true) => {
                            drop_count.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                camera = feed.id(),
                                expected,
                                actual = frame.len(),
                                "Dropping frame with unexpected size"
                            );
                        }
                        Ok(false) => {}
                        Err(e) => {
                            error!(camera = feed.id(), error = %e, "Capture failed");
                            break;
                        }
                    }
                }

                running.store(false, Ordering::Relaxed);
                feed.stop();
            })?
    };

    Ok(CaptureHandle {
        camera: config.id,
        running,
        frame_count,
        drop_count,
        thread: Some(thread),
    })
}

/// Publishes one captured frame and its derived views into `feed`
pub fn publish_frame(
    feed: &CameraFeed,
    detector: &mut MotionDetector,
    frame: &[u8],
    reduced: &mut Vec<u8>,
) {
    let size = feed.size();
    if size.reduced() != size {
        downscale_half(frame, size, reduced);
        feed.publish_capture(frame, reduced);
    } else {
        feed.publish_capture(frame, frame);
    }

    let result = detector.process(frame);
    feed.publish(StreamView::Motion, detector.motion_image());
    feed.publish(StreamView::Secondary, detector.secondary_image());

    if result.active != feed.motion_active() {
        debug!(
            camera = feed.id(),
            active = result.active,
            changed = result.changed_pixels,
            "Motion state changed"
        );
    }
    feed.set_motion(result.active);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn config() -> CameraConfig {
        let mut config = CameraConfig::with_id(1);
        config.width = 32;
        config.height = 32;
        config.fps = 60;
        config
    }

    #[test]
    fn test_publish_frame_fills_every_view() {
        let config = config();
        let feed = CameraFeed::new(&config);
        let mut detector = MotionDetector::new(&config);
        let frame = vec![90u8; feed.size().frame_len()];
        let mut reduced = Vec::new();

        publish_frame(&feed, &mut detector, &frame, &mut reduced);

        let mut out = Vec::new();
        for view in [
            StreamView::Full,
            StreamView::Reduced,
            StreamView::Motion,
            StreamView::Source,
            StreamView::Secondary,
        ] {
            let copy = feed.copy_view(view, &mut out).unwrap();
            assert_eq!(copy, crate::frame::FrameCopy::Captured, "view {}", view);
            assert_eq!(out.len(), feed.view_size(view).frame_len());
        }
        assert!(!feed.motion_active());
    }

    #[cfg(not(feature = "capture-gstreamer"))]
    #[test]
    fn test_gstreamer_unavailable() {
        let mut config = config();
        config.source = SourceKind::Gstreamer;
        let feed = Arc::new(CameraFeed::new(&config));
        assert!(matches!(
            spawn(&config, feed),
            Err(CaptureError::Unsupported("gstreamer"))
        ));
    }

    #[test]
    fn test_pattern_thread_publishes_and_stops() {
        let config = config();
        let feed = Arc::new(CameraFeed::new(&config));
        let mut handle = spawn(&config, Arc::clone(&feed)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while feed.frames_published() < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(feed.frames_published() >= 2);

        handle.stop();
        assert!(feed.is_stopped());
        assert!(!handle.get_stats().is_running);
    }
}
