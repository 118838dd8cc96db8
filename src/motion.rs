//! Frame-differencing motion detector
//!
//! Compares the luma plane of consecutive frames. Pixels whose brightness
//! changed by more than `threshold` count as changed; motion is active when at
//! least `min_changed_pixels` changed. Besides the boolean signal the detector
//! renders two derived images:
//! - the motion view: changed pixels kept, everything else black
//! - the secondary view: the frame with the changed region outlined

use crate::config::CameraConfig;
use crate::frame::PictureSize;

/// Neutral chroma value (no colour)
const NEUTRAL_CHROMA: u8 = 128;

/// Luma used to outline the changed region
const OUTLINE_LUMA: u8 = 255;

/// Result of analysing one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionResult {
    pub changed_pixels: usize,
    pub active: bool,
}

/// Axis-aligned bounds of the changed pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Bounds {
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
}

pub struct MotionDetector {
    size: PictureSize,
    threshold: u8,
    min_changed_pixels: usize,
    previous: Option<Vec<u8>>,
    motion_image: Vec<u8>,
    secondary_image: Vec<u8>,
}

impl MotionDetector {
    pub fn new(config: &CameraConfig) -> Self {
        let size = PictureSize::new(config.width, config.height);
        Self {
            size,
            threshold: config.threshold,
            min_changed_pixels: config.min_changed_pixels,
            previous: None,
            motion_image: vec![0; size.frame_len()],
            secondary_image: vec![0; size.frame_len()],
        }
    }

    /// Analyses `frame` against the previous one and refreshes the derived images
    ///
    /// The first frame never reports motion.
    pub fn process(&mut self, frame: &[u8]) -> MotionResult {
        let luma_len = self.size.luma_len();
        let width = self.size.width as usize;
        let luma = &frame[..luma_len.min(frame.len())];

        let (motion_luma, motion_chroma) = self.motion_image.split_at_mut(luma_len);
        motion_chroma.fill(NEUTRAL_CHROMA);

        let mut changed = 0;
        let mut bounds: Option<Bounds> = None;

        match self.previous.as_deref() {
            Some(previous) if previous.len() == luma.len() => {
                for (i, (&now, &before)) in luma.iter().zip(previous).enumerate() {
                    if now.abs_diff(before) > self.threshold {
                        changed += 1;
                        motion_luma[i] = now;
                        let (x, y) = (i % width, i / width);
                        bounds = Some(match bounds {
                            None => Bounds {
                                min_x: x,
                                min_y: y,
                                max_x: x,
                                max_y: y,
                            },
                            Some(b) => Bounds {
                                min_x: b.min_x.min(x),
                                min_y: b.min_y.min(y),
                                max_x: b.max_x.max(x),
                                max_y: b.max_y.max(y),
                            },
                        });
                    } else {
                        motion_luma[i] = 0;
                    }
                }
            }
            _ => motion_luma.fill(0),
        }

        match self.previous.as_mut() {
            Some(previous) if previous.len() == luma.len() => previous.copy_from_slice(luma),
            _ => self.previous = Some(luma.to_vec()),
        }

        let active = changed >= self.min_changed_pixels && changed > 0;
        self.render_secondary(frame, if active { bounds } else { None });

        MotionResult {
            changed_pixels: changed,
            active,
        }
    }

    /// Motion-only rendering of the last processed frame
    pub fn motion_image(&self) -> &[u8] {
        &self.motion_image
    }

    /// Last processed frame with the changed region outlined
    pub fn secondary_image(&self) -> &[u8] {
        &self.secondary_image
    }

    fn render_secondary(&mut self, frame: &[u8], bounds: Option<Bounds>) {
        if frame.len() != self.secondary_image.len() {
            return;
        }
        self.secondary_image.copy_from_slice(frame);

        let Some(b) = bounds else {
            return;
        };
        let width = self.size.width as usize;
        let luma = &mut self.secondary_image[..self.size.luma_len()];
        for x in b.min_x..=b.max_x {
            luma[b.min_y * width + x] = OUTLINE_LUMA;
            luma[b.max_y * width + x] = OUTLINE_LUMA;
        }
        for y in b.min_y..=b.max_y {
            luma[y * width + b.min_x] = OUTLINE_LUMA;
            luma[y * width + b.max_x] = OUTLINE_LUMA;
        }
    }
}
