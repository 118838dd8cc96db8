//! Raw picture geometry and the per-camera shared frame buffers
//!
//! A [`CameraFeed`] holds the most recent planar I420 image for every
//! per-camera view. One capture thread writes into it, any number of stream
//! sessions copy out of it. The lock is only ever held for a memcpy.

mod mosaic;
mod scale;

pub use mosaic::Mosaic;
pub use scale::downscale_half;

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::TryReserveError;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;

use crate::config::CameraConfig;

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("failed to allocate {len} bytes for frame copy: {source}")]
    Alloc {
        len: usize,
        #[source]
        source: TryReserveError,
    },

    #[error("frame size mismatch: expected {expected} bytes, source holds {actual}")]
    SizeMismatch { expected: usize, actual: usize },
}

/// Dimensions of a planar I420 picture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PictureSize {
    pub width: u32,
    pub height: u32,
}

impl PictureSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes in the luma plane
    pub fn luma_len(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes in each chroma plane
    pub fn chroma_len(&self) -> usize {
        (self.width as usize / 2) * (self.height as usize / 2)
    }

    /// Bytes in a full I420 frame (Y + U + V)
    pub fn frame_len(&self) -> usize {
        self.luma_len() + 2 * self.chroma_len()
    }

    /// Size of the reduced view: half resolution when both dimensions are
    /// multiples of 16, otherwise unchanged
    pub fn reduced(&self) -> Self {
        if self.width % 16 == 0 && self.height % 16 == 0 {
            Self::new(self.width / 2, self.height / 2)
        } else {
            *self
        }
    }
}

impl fmt::Display for PictureSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which image of a camera a stream session encodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamView {
    /// Primary full-resolution image
    #[serde(rename = "stream")]
    Full,
    /// Half-resolution image (when dimensions allow)
    #[serde(rename = "substream")]
    Reduced,
    /// Motion-only image, paced down to 1 fps while nothing moves
    Motion,
    /// Unprocessed capture image
    Source,
    /// Secondary processed image (detection overlay)
    Secondary,
    /// All cameras tiled into one picture
    Mosaic,
}

impl StreamView {
    /// Parses the view segment of a stream URL
    pub fn from_path(segment: &str) -> Option<Self> {
        match segment {
            "stream" => Some(Self::Full),
            "substream" => Some(Self::Reduced),
            "motion" => Some(Self::Motion),
            "source" => Some(Self::Source),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "stream",
            Self::Reduced => "substream",
            Self::Motion => "motion",
            Self::Source => "source",
            Self::Secondary => "secondary",
            Self::Mosaic => "mosaic",
        }
    }
}

impl fmt::Display for StreamView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest image for one view plus its consumed flag
#[derive(Debug, Default)]
struct FrameSlot {
    image: Option<Vec<u8>>,
    consumed: bool,
}

impl FrameSlot {
    fn store(&mut self, data: &[u8]) {
        match self.image.as_mut() {
            Some(image) if image.len() == data.len() => image.copy_from_slice(data),
            _ => self.image = Some(data.to_vec()),
        }
        self.consumed = false;
    }
}

#[derive(Debug, Default)]
struct FeedSlots {
    full: FrameSlot,
    reduced: FrameSlot,
    motion: FrameSlot,
    source: FrameSlot,
    secondary: FrameSlot,
}

impl FeedSlots {
    fn slot(&mut self, view: StreamView) -> Option<&mut FrameSlot> {
        match view {
            StreamView::Full => Some(&mut self.full),
            StreamView::Reduced => Some(&mut self.reduced),
            StreamView::Motion => Some(&mut self.motion),
            StreamView::Source => Some(&mut self.source),
            StreamView::Secondary => Some(&mut self.secondary),
            StreamView::Mosaic => None,
        }
    }
}

/// Outcome of copying a view out of a feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCopy {
    /// A captured image was copied
    Captured,
    /// Nothing captured yet, a zero-filled frame was produced
    Blank,
}

/// Shared frame source for one camera
pub struct CameraFeed {
    id: u32,
    name: String,
    size: PictureSize,
    slots: Mutex<FeedSlots>,
    motion_active: AtomicBool,
    stopped: AtomicBool,
    frames_published: AtomicU64,
}

impl CameraFeed {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            id: config.id,
            name: config.display_name(),
            size: PictureSize::new(config.width, config.height),
            slots: Mutex::new(FeedSlots::default()),
            motion_active: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            frames_published: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Capture resolution
    pub fn size(&self) -> PictureSize {
        self.size
    }

    /// Resolution of the picture stored for `view`
    pub fn view_size(&self, view: StreamView) -> PictureSize {
        match view {
            StreamView::Reduced => self.size.reduced(),
            _ => self.size,
        }
    }

    /// Stores a new image for one view
    pub fn publish(&self, view: StreamView, data: &[u8]) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.slot(view) {
            slot.store(data);
        }
    }

    /// Stores a freshly captured frame into the full, source and reduced views
    pub fn publish_capture(&self, data: &[u8], reduced: &[u8]) {
        {
            let mut slots = self.slots.lock();
            slots.full.store(data);
            slots.source.store(data);
            slots.reduced.store(reduced);
        }
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current image of `view` into `dst`
    ///
    /// `dst` is resized to the view's frame length. Without a captured image
    /// the copy is zero-filled. A captured image is marked consumed.
    pub fn copy_view(
        &self,
        view: StreamView,
        dst: &mut Vec<u8>,
    ) -> Result<FrameCopy, AcquireError> {
        let expected = self.view_size(view).frame_len();
        reserve_frame(dst, expected)?;

        let mut slots = self.slots.lock();
        let slot = match slots.slot(view) {
            Some(slot) => slot,
            None => return Ok(blank(dst, expected)),
        };
        match slot.image.as_deref() {
            Some(image) if image.len() != expected => Err(AcquireError::SizeMismatch {
                expected,
                actual: image.len(),
            }),
            Some(image) => {
                dst.clear();
                dst.extend_from_slice(image);
                slot.consumed = true;
                Ok(FrameCopy::Captured)
            }
            None => Ok(blank(dst, expected)),
        }
    }

    /// Runs `f` over the current image of `view` while holding the lock
    pub fn read_view<R>(&self, view: StreamView, f: impl FnOnce(Option<&[u8]>) -> R) -> R {
        let mut slots = self.slots.lock();
        let image = slots.slot(view).and_then(|slot| slot.image.as_deref());
        f(image)
    }

    /// Whether the image of `view` has been read since it was last written
    pub fn is_consumed(&self, view: StreamView) -> bool {
        let mut slots = self.slots.lock();
        slots.slot(view).map(|slot| slot.consumed).unwrap_or(true)
    }

    pub fn set_motion(&self, active: bool) {
        self.motion_active.store(active, Ordering::Relaxed);
    }

    pub fn motion_active(&self) -> bool {
        self.motion_active.load(Ordering::Relaxed)
    }

    /// Marks the camera as stopped; open streams end on their next pull
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    pub fn frames_published(&self) -> u64 {
        self.frames_published.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CameraFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CameraFeed")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("size", &self.size)
            .finish()
    }
}

fn blank(dst: &mut Vec<u8>, len: usize) -> FrameCopy {
    dst.clear();
    dst.resize(len, 0);
    FrameCopy::Blank
}

/// Makes room for `len` bytes in `dst`, reporting allocation failure
pub(crate) fn reserve_frame(dst: &mut Vec<u8>, len: usize) -> Result<(), AcquireError> {
    let additional = len.saturating_sub(dst.len());
    dst.try_reserve_exact(additional)
        .map_err(|source| AcquireError::Alloc { len, source })
}
