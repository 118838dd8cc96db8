//! Program specific information: PAT and PMT sections

use bytes::{BufMut, BytesMut};

use super::crc::crc32_mpeg2;
use super::packet::TS_BODY_SIZE;

pub const PAT_TABLE_ID: u8 = 0x00;
pub const PMT_TABLE_ID: u8 = 0x02;

/// Transport stream id written into the PAT
const TRANSPORT_STREAM_ID: u16 = 0x0001;

/// reserved(2) | version(5) = 0 | current_next(1) = 1
const VERSION_CURRENT: u8 = 0xC1;

/// Program association section listing one program
pub fn pat_section(program_number: u16, pmt_pid: u16) -> BytesMut {
    let mut body = BytesMut::with_capacity(4);
    body.put_u16(program_number);
    body.put_u16(0xE000 | (pmt_pid & 0x1FFF));
    section(PAT_TABLE_ID, TRANSPORT_STREAM_ID, &body)
}

/// Program map section describing one elementary stream
pub fn pmt_section(program_number: u16, pcr_pid: u16, stream_type: u8, es_pid: u16) -> BytesMut {
    let mut body = BytesMut::with_capacity(9);
    body.put_u16(0xE000 | (pcr_pid & 0x1FFF));
    // program_info_length = 0
    body.put_u16(0xF000);
    body.put_u8(stream_type);
    body.put_u16(0xE000 | (es_pid & 0x1FFF));
    // ES_info_length = 0
    body.put_u16(0xF000);
    section(PMT_TABLE_ID, program_number, &body)
}

/// Wraps `body` in a long-form section header and appends the CRC
///
/// ```text
///  table_id(8) | syntax(1) 0(1) reserved(2) length(12) | id(16)
///  | version/current(8) | section_number(8) | last_section_number(8)
///  | body | CRC_32
/// ```
fn section(table_id: u8, id: u16, body: &[u8]) -> BytesMut {
    // Everything after the length field: id + 3 bytes + body + CRC
    let length = 5 + body.len() + 4;
    let mut out = BytesMut::with_capacity(3 + length);
    out.put_u8(table_id);
    out.put_u16(0xB000 | (length as u16 & 0x0FFF));
    out.put_u16(id);
    out.put_u8(VERSION_CURRENT);
    out.put_u8(0);
    out.put_u8(0);
    out.put_slice(body);
    let crc = crc32_mpeg2(&out);
    out.put_u32(crc);
    out
}

/// Packet payload carrying a whole section: pointer field, section, 0xFF fill
pub fn section_payload(section: &[u8]) -> [u8; TS_BODY_SIZE] {
    let mut payload = [0xFF; TS_BODY_SIZE];
    payload[0] = 0;
    payload[1..1 + section.len()].copy_from_slice(section);
    payload
}
