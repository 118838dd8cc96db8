//! Synthetic test pattern source (no camera hardware needed)

use std::time::{Duration, Instant};

use super::{CaptureError, FrameProducer};
use crate::config::CameraConfig;
use crate::frame::PictureSize;

/// Width of the moving bar in pixels
const BAR_WIDTH: u32 = 16;

/// Horizontal bar movement per frame in pixels
const BAR_STEP: u32 = 4;

/// Moving-bar I420 pattern delivered at the camera's frame rate
///
/// The background is a static horizontal luma gradient; a bright vertical bar
/// sweeps across it so the motion detector always has something to see.
pub struct PatternSource {
    size: PictureSize,
    interval: Duration,
    next_due: Option<Instant>,
    frame_index: u64,
}

impl PatternSource {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            size: PictureSize::new(config.width, config.height),
            interval: Duration::from_secs(1) / config.fps.max(1),
            next_due: None,
            frame_index: 0,
        }
    }

    /// Renders frame number `index` into `frame`
    pub fn render(&self, index: u64, frame: &mut Vec<u8>) {
        let (w, h) = (self.size.width as usize, self.size.height as usize);
        frame.clear();
        frame.resize(self.size.frame_len(), 128);

        let span = self.size.width + BAR_WIDTH;
        let bar_start = ((index * BAR_STEP as u64) % span as u64) as usize;
        let bar = bar_start.saturating_sub(BAR_WIDTH as usize)..bar_start;

        let luma = &mut frame[..w * h];
        for row in luma.chunks_exact_mut(w) {
            for (x, px) in row.iter_mut().enumerate() {
                *px = if bar.contains(&x) {
                    235
                } else {
                    (16 + x * 160 / w.max(1)) as u8
                };
            }
        }
    }
}

impl FrameProducer for PatternSource {
    fn next_frame(&mut self, frame: &mut Vec<u8>) -> Result<bool, CaptureError> {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        self.next_due = Some(due.max(now) + self.interval);

        self.render(self.frame_index, frame);
        self.frame_index += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> PatternSource {
        let mut config = CameraConfig::with_id(1);
        config.width = 64;
        config.height = 16;
        PatternSource::new(&config)
    }

    #[test]
    fn test_render_size_and_chroma() {
        let source = source();
        let mut frame = Vec::new();
        source.render(0, &mut frame);

        assert_eq!(frame.len(), 64 * 16 * 3 / 2);
        assert!(frame[64 * 16..].iter().all(|&b| b == 128));
    }

    #[test]
    fn test_bar_moves() {
        let source = source();
        let mut a = Vec::new();
        let mut b = Vec::new();
        source.render(5, &mut a);
        source.render(6, &mut b);

        assert_ne!(a, b);
        // Bar ends at x = 20 on frame 5
        assert_eq!(a[19], 235);
        assert_ne!(a[20], 235);
    }

    #[test]
    fn test_next_frame_paced() {
        let mut source = source();
        let mut frame = Vec::new();
        let start = Instant::now();
        assert!(source.next_frame(&mut frame).unwrap());
        assert!(source.next_frame(&mut frame).unwrap());
        assert!(start.elapsed() >= source.interval);
    }
}
