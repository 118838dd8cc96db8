//! Frame acquisition for a stream session

use std::sync::Arc;

use crate::frame::{AcquireError, CameraFeed, FrameCopy, Mosaic, PictureSize, StreamView};

/// Where a session's frames come from
#[derive(Debug, Clone)]
pub enum SessionSource {
    Camera(Arc<CameraFeed>),
    Mosaic(Arc<Mosaic>),
}

impl SessionSource {
    /// Camera id used in URLs; the mosaic is camera 0
    pub fn camera_id(&self) -> u32 {
        match self {
            Self::Camera(feed) => feed.id(),
            Self::Mosaic(_) => 0,
        }
    }

    pub fn motion_active(&self) -> bool {
        match self {
            Self::Camera(feed) => feed.motion_active(),
            Self::Mosaic(mosaic) => mosaic.motion_active(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        match self {
            Self::Camera(feed) => feed.is_stopped(),
            Self::Mosaic(mosaic) => mosaic.is_stopped(),
        }
    }
}

/// Copies the selected view of a source into a reusable frame buffer
#[derive(Debug)]
pub struct FrameAcquirer {
    source: SessionSource,
    view: StreamView,
    size: PictureSize,
}

impl FrameAcquirer {
    /// Pairs a source with a view; `None` if the source cannot serve the view
    pub fn new(source: SessionSource, view: StreamView) -> Option<Self> {
        let size = match (&source, view) {
            (SessionSource::Mosaic(mosaic), StreamView::Mosaic) => mosaic.dimensions(),
            (SessionSource::Mosaic(_), _) | (SessionSource::Camera(_), StreamView::Mosaic) => {
                return None
            }
            (SessionSource::Camera(feed), view) => feed.view_size(view),
        };
        Some(Self { source, view, size })
    }

    pub fn source(&self) -> &SessionSource {
        &self.source
    }

    pub fn view(&self) -> StreamView {
        self.view
    }

    /// Picture size of every acquired frame
    pub fn size(&self) -> PictureSize {
        self.size
    }

    /// Fills `dst` with the current frame
    pub fn acquire(&self, dst: &mut Vec<u8>) -> Result<FrameCopy, AcquireError> {
        match &self.source {
            SessionSource::Camera(feed) => feed.copy_view(self.view, dst),
            SessionSource::Mosaic(mosaic) => {
                mosaic.compose(dst)?;
                Ok(FrameCopy::Captured)
            }
        }
    }
}
