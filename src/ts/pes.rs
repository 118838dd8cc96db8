//! Packetized elementary stream headers (ISO/IEC 13818-1, 2.4.3.6)

use bytes::{BufMut, BytesMut};

/// First video stream id
pub const VIDEO_STREAM_ID: u8 = 0xE0;

/// H.264 access unit delimiter (primary_pic_type = any)
pub const H264_AUD: [u8; 6] = [0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];

/// Writes a video PES header
///
/// PES_packet_length is zero (unbounded), which is allowed for video carried
/// in transport streams. DTS is only written when it differs from PTS.
pub fn write_header(out: &mut BytesMut, pts: u64, dts: u64) {
    let with_dts = pts != dts;

    out.put_slice(&[0x00, 0x00, 0x01, VIDEO_STREAM_ID]);
    out.put_u16(0);
    // '10' marker, no scrambling, no priority, no alignment, no copyright, original
    out.put_u8(0x80);
    if with_dts {
        out.put_u8(0xC0);
        out.put_u8(10);
        out.put_slice(&encode_timestamp(0x3, pts));
        out.put_slice(&encode_timestamp(0x1, dts));
    } else {
        out.put_u8(0x80);
        out.put_u8(5);
        out.put_slice(&encode_timestamp(0x2, pts));
    }
}

/// Encodes a 33-bit timestamp with its 4-bit prefix and marker bits
///
/// ```text
///  prefix(4) ts[32..30](3) 1 | ts[29..15](15) 1 | ts[14..0](15) 1
/// ```
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    let ts = ts & 0x1_FFFF_FFFF;
    [
        (prefix << 4) | (((ts >> 29) as u8) & 0x0E) | 1,
        (ts >> 22) as u8,
        (((ts >> 14) as u8) & 0xFE) | 1,
        (ts >> 7) as u8,
        (((ts << 1) as u8) & 0xFE) | 1,
    ]
}

/// Decodes a timestamp written by [`encode_timestamp`]
pub fn decode_timestamp(bytes: &[u8]) -> u64 {
    ((bytes[0] as u64 >> 1) & 0x07) << 30
        | (bytes[1] as u64) << 22
        | (bytes[2] as u64 >> 1) << 15
        | (bytes[3] as u64) << 7
        | bytes[4] as u64 >> 1
}

/// True if `data` already begins with an H.264 access unit delimiter
pub fn starts_with_aud(data: &[u8]) -> bool {
    let nal = if data.starts_with(&[0, 0, 0, 1]) {
        data.get(4)
    } else if data.starts_with(&[0, 0, 1]) {
        data.get(3)
    } else {
        None
    };
    matches!(nal, Some(&b) if b & 0x1F == 9)
}
