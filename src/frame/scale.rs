//! 2x2 box downscaling of I420 pictures

use super::PictureSize;

/// Halves an I420 picture in both dimensions by averaging 2x2 blocks
///
/// `dst` is overwritten with the reduced frame. Returns the reduced size.
pub fn downscale_half(src: &[u8], size: PictureSize, dst: &mut Vec<u8>) -> PictureSize {
    let out = PictureSize::new(size.width / 2, size.height / 2);
    dst.clear();
    dst.resize(out.frame_len(), 0);

    let (w, h) = (size.width as usize, size.height as usize);
    let (src_y, src_chroma) = src.split_at(size.luma_len());
    let (src_u, src_v) = src_chroma.split_at(size.chroma_len());

    let (dst_y, dst_chroma) = dst.split_at_mut(out.luma_len());
    let (dst_u, dst_v) = dst_chroma.split_at_mut(out.chroma_len());

    halve_plane(src_y, w, h, dst_y);
    halve_plane(src_u, w / 2, h / 2, dst_u);
    halve_plane(src_v, w / 2, h / 2, dst_v);

    out
}

fn halve_plane(src: &[u8], width: usize, height: usize, dst: &mut [u8]) {
    let out_w = width / 2;
    for y in 0..height / 2 {
        let row0 = &src[2 * y * width..];
        let row1 = &src[(2 * y + 1) * width..];
        for x in 0..out_w {
            let sum = row0[2 * x] as u16
                + row0[2 * x + 1] as u16
                + row1[2 * x] as u16
                + row1[2 * x + 1] as u16;
            dst[y * out_w + x] = ((sum + 2) / 4) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_uniform() {
        let size = PictureSize::new(32, 16);
        let src = vec![100u8; size.frame_len()];
        let mut dst = Vec::new();

        let out = downscale_half(&src, size, &mut dst);

        assert_eq!(out, PictureSize::new(16, 8));
        assert_eq!(dst.len(), out.frame_len());
        assert!(dst.iter().all(|&b| b == 100));
    }

    #[test]
    fn test_downscale_averages_blocks() {
        let size = PictureSize::new(4, 4);
        let mut src = vec![0u8; size.frame_len()];
        // Top-left 2x2 luma block: 0, 10, 20, 30 -> 15
        src[1] = 10;
        src[4] = 20;
        src[5] = 30;
        let mut dst = Vec::new();

        downscale_half(&src, size, &mut dst);

        assert_eq!(dst[0], 15);
        assert_eq!(dst[1], 0);
    }
}
