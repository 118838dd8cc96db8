//! Aggregate view tiling every camera's full image into one picture

use std::sync::Arc;

use super::{reserve_frame, AcquireError, CameraFeed, PictureSize, StreamView};

#[derive(Debug, Clone, Copy)]
struct Tile {
    x: u32,
    y: u32,
    size: PictureSize,
}

/// Grid compositor over a set of camera feeds
///
/// Cameras are laid out left to right, `columns` per row. Each row is as tall
/// as its tallest camera; the picture is as wide as the widest row.
#[derive(Debug)]
pub struct Mosaic {
    feeds: Vec<Arc<CameraFeed>>,
    tiles: Vec<Tile>,
    size: PictureSize,
}

impl Mosaic {
    pub fn new(feeds: Vec<Arc<CameraFeed>>, columns: usize) -> Self {
        let columns = columns.max(1);
        let mut tiles = Vec::with_capacity(feeds.len());
        let (mut width, mut height) = (0u32, 0u32);

        for row in feeds.chunks(columns) {
            let mut x = 0;
            let mut row_height = 0;
            for feed in row {
                let size = feed.size();
                tiles.push(Tile { x, y: height, size });
                x += size.width;
                row_height = row_height.max(size.height);
            }
            width = width.max(x);
            height += row_height;
        }

        // Encoders need even dimensions
        let size = PictureSize::new(width.max(2) + width % 2, height.max(2) + height % 2);

        Self { feeds, tiles, size }
    }

    /// Dimensions of the composed picture
    pub fn dimensions(&self) -> PictureSize {
        self.size
    }

    /// Bytes needed to hold one composed frame
    pub fn required_size(&self) -> usize {
        self.size.frame_len()
    }

    /// True once every camera has stopped
    pub fn is_stopped(&self) -> bool {
        !self.feeds.is_empty() && self.feeds.iter().all(|feed| feed.is_stopped())
    }

    /// Motion is active if any camera reports it
    pub fn motion_active(&self) -> bool {
        self.feeds.iter().any(|feed| feed.motion_active())
    }

    /// Composes the current full image of every camera into `dst`
    ///
    /// Cameras without an image yet leave their tile black. Each camera's
    /// lock is held only while its tile is copied.
    pub fn compose(&self, dst: &mut Vec<u8>) -> Result<(), AcquireError> {
        let len = self.required_size();
        reserve_frame(dst, len)?;
        dst.clear();
        dst.resize(len, 0);

        for (feed, tile) in self.feeds.iter().zip(&self.tiles) {
            feed.read_view(StreamView::Full, |image| match image {
                Some(image) if image.len() == tile.size.frame_len() => {
                    blit(image, *tile, dst, self.size);
                }
                _ => {}
            });
        }

        Ok(())
    }
}

/// Copies an I420 tile into the composed picture at the tile's offset
fn blit(src: &[u8], tile: Tile, dst: &mut [u8], canvas: PictureSize) {
    let (tw, th) = (tile.size.width as usize, tile.size.height as usize);
    let cw = canvas.width as usize;
    let (x, y) = (tile.x as usize, tile.y as usize);

    let (src_y, src_chroma) = src.split_at(tile.size.luma_len());
    let (src_u, src_v) = src_chroma.split_at(tile.size.chroma_len());
    let (dst_y, dst_chroma) = dst.split_at_mut(canvas.luma_len());
    let (dst_u, dst_v) = dst_chroma.split_at_mut(canvas.chroma_len());

    copy_plane(src_y, tw, th, dst_y, cw, x, y);
    copy_plane(src_u, tw / 2, th / 2, dst_u, cw / 2, x / 2, y / 2);
    copy_plane(src_v, tw / 2, th / 2, dst_v, cw / 2, x / 2, y / 2);
}

fn copy_plane(
    src: &[u8],
    width: usize,
    height: usize,
    dst: &mut [u8],
    stride: usize,
    x: usize,
    y: usize,
) {
    for row in 0..height {
        let from = &src[row * width..(row + 1) * width];
        let at = (y + row) * stride + x;
        dst[at..at + width].copy_from_slice(from);
    }
}
