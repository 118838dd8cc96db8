//! Transport stream packets (ISO/IEC 13818-1, 2.4.3)

/// Every transport packet is exactly this long
pub const TS_PACKET_SIZE: usize = 188;

/// First byte of every packet
pub const SYNC_BYTE: u8 = 0x47;

/// Bytes after the 4-byte packet header
pub const TS_BODY_SIZE: usize = TS_PACKET_SIZE - 4;

/// Adaptation field length byte + flags byte
const AF_FIXED_SIZE: usize = 2;

/// Encoded PCR size
const PCR_SIZE: usize = 6;

/// Transport packet header
///
/// ```text
///  sync(8) | TEI(1) PUSI(1) prio(1) PID(13) | scr(2) AFC(2) CC(4)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub pid: u16,
    /// Payload unit start indicator (first packet of a PES or section)
    pub payload_unit_start: bool,
    pub continuity_counter: u8,
}

/// Adaptation field content requested for a packet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub random_access: bool,
    /// Program clock reference base in 90 kHz ticks
    pub pcr: Option<u64>,
}

impl AdaptationField {
    fn is_empty(&self) -> bool {
        !self.random_access && self.pcr.is_none()
    }

    /// Bytes the field needs including its length byte, before stuffing
    fn encoded_len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            AF_FIXED_SIZE + if self.pcr.is_some() { PCR_SIZE } else { 0 }
        }
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.random_access {
            flags |= 0x40;
        }
        if self.pcr.is_some() {
            flags |= 0x10;
        }
        flags
    }
}

/// Writes one packet carrying as much of `payload` as fits
///
/// Short payloads are padded with adaptation-field stuffing so the packet is
/// always [`TS_PACKET_SIZE`] bytes. Returns the number of payload bytes used.
pub fn write_packet(
    out: &mut [u8; TS_PACKET_SIZE],
    header: PacketHeader,
    af: AdaptationField,
    payload: &[u8],
) -> usize {
    let space = TS_BODY_SIZE - af.encoded_len();
    let used = payload.len().min(space);
    let af_len = if used < space {
        TS_BODY_SIZE - used
    } else {
        af.encoded_len()
    };

    // adaptation_field_control: 0b10 adaptation field, 0b01 payload
    let mut control = 0u8;
    if af_len > 0 {
        control |= 0x2;
    }
    if used > 0 {
        control |= 0x1;
    }

    out[0] = SYNC_BYTE;
    out[1] = (if header.payload_unit_start { 0x40 } else { 0 }) | ((header.pid >> 8) as u8 & 0x1F);
    out[2] = header.pid as u8;
    out[3] = (control << 4) | (header.continuity_counter & 0x0F);

    let body = &mut out[4..];
    match af_len {
        0 => {}
        // A lone length byte of zero is a one-byte stuffing field
        1 => body[0] = 0,
        _ => {
            body[0] = (af_len - 1) as u8;
            body[1] = af.flags();
            let mut at = AF_FIXED_SIZE;
            if let Some(pcr) = af.pcr {
                body[at..at + PCR_SIZE].copy_from_slice(&encode_pcr(pcr));
                at += PCR_SIZE;
            }
            body[at..af_len].fill(0xFF);
        }
    }

    body[af_len..af_len + used].copy_from_slice(&payload[..used]);
    used
}

/// Encodes a PCR with a zero extension
///
/// ```text
///  base(33) | reserved(6) | extension(9)
/// ```
pub fn encode_pcr(base: u64) -> [u8; PCR_SIZE] {
    let base = base & 0x1_FFFF_FFFF;
    [
        (base >> 25) as u8,
        (base >> 17) as u8,
        (base >> 9) as u8,
        (base >> 1) as u8,
        (((base & 1) << 7) as u8) | 0x7E,
        0,
    ]
}

/// Parsed view of a packet header, used by tests and diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedPacket {
    pub pid: u16,
    pub payload_unit_start: bool,
    pub continuity_counter: u8,
    pub has_adaptation: bool,
    pub has_payload: bool,
    pub random_access: bool,
    pub pcr: Option<u64>,
    /// Offset of the payload within the packet
    pub payload_offset: usize,
}

impl ParsedPacket {
    pub fn parse(packet: &[u8]) -> Option<Self> {
        if packet.len() != TS_PACKET_SIZE || packet[0] != SYNC_BYTE {
            return None;
        }

        let pid = u16::from_be_bytes([packet[1] & 0x1F, packet[2]]);
        let control = packet[3] >> 4;
        let has_adaptation = control & 0x2 != 0;
        let has_payload = control & 0x1 != 0;

        let mut random_access = false;
        let mut pcr = None;
        let mut payload_offset = 4;
        if has_adaptation {
            let len = packet[4] as usize;
            if 5 + len > TS_PACKET_SIZE {
                return None;
            }
            if len > 0 {
                let flags = packet[5];
                random_access = flags & 0x40 != 0;
                if flags & 0x10 != 0 && len >= 7 {
                    let b = &packet[6..12];
                    pcr = Some(
                        (b[0] as u64) << 25
                            | (b[1] as u64) << 17
                            | (b[2] as u64) << 9
                            | (b[3] as u64) << 1
                            | (b[4] as u64) >> 7,
                    );
                }
            }
            payload_offset = 5 + len;
        }

        Some(Self {
            pid,
            payload_unit_start: packet[1] & 0x40 != 0,
            continuity_counter: packet[3] & 0x0F,
            has_adaptation,
            has_payload,
            random_access,
            pcr,
            payload_offset,
        })
    }
}
