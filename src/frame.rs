//! SPDY/3 framing: the 8-byte frame header, protocol constants and frame
//! builders for everything the client side ever puts on the wire.
//!
//! Every integer on the wire is network byte order. A control frame header is
//! `1 << 31 | version << 16 | type` followed by `flags << 24 | length`; a data
//! frame header is the stream ID (top bit clear) followed by the same
//! flags/length word.

/// Protocol version carried in every control frame.
pub const SPDY_VERSION: u16 = 3;

/// Size of the common frame header.
pub const FRAME_HEADER_LEN: usize = 8;

/// Largest payload a 24-bit length field can describe.
pub const MAX_FRAME_LENGTH: u32 = 0x00ff_ffff;

/// Stream IDs at or beyond this value put the session into go-away.
pub const MAX_STREAM_ID: u32 = 0x0780_0000;

/// Frame flags
pub mod flags {
    /// FIN on data, SYN_STREAM, SYN_REPLY and HEADERS frames.
    pub const FIN: u8 = 0x01;
    /// Top bit of the first header byte marks a control frame.
    pub const CONTROL: u8 = 0x80;
}

/// SETTINGS identifiers (low 24 bits of an entry's first word)
#[allow(dead_code)]
pub mod settings_id {
    pub const UPLOAD_BW: u32 = 1;
    pub const DOWNLOAD_BW: u32 = 2;
    pub const ROUND_TRIP_TIME: u32 = 3;
    pub const MAX_CONCURRENT: u32 = 4;
    pub const CWND: u32 = 5;
    pub const DOWNLOAD_RETRANS_RATE: u32 = 6;
    pub const INITIAL_WINDOW: u32 = 7;
    pub const CLIENT_CERTIFICATE_VECTOR_SIZE: u32 = 8;
}

/// Control frame types understood by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ControlType {
    SynStream = 1,
    SynReply = 2,
    RstStream = 3,
    Settings = 4,
    Noop = 5,
    Ping = 6,
    GoAway = 7,
    Headers = 8,
    WindowUpdate = 9,
}

impl ControlType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Self::SynStream),
            2 => Some(Self::SynReply),
            3 => Some(Self::RstStream),
            4 => Some(Self::Settings),
            5 => Some(Self::Noop),
            6 => Some(Self::Ping),
            7 => Some(Self::GoAway),
            8 => Some(Self::Headers),
            9 => Some(Self::WindowUpdate),
            _ => None,
        }
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// RST_STREAM status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RstCode {
    ProtocolError = 1,
    InvalidStream = 2,
    RefusedStream = 3,
    UnsupportedVersion = 4,
    Cancel = 5,
    InternalError = 6,
    FlowControlError = 7,
    StreamInUse = 8,
    StreamAlreadyClosed = 9,
    InvalidCredentials = 10,
    FrameTooLarge = 11,
}

impl RstCode {
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::ProtocolError),
            2 => Some(Self::InvalidStream),
            3 => Some(Self::RefusedStream),
            4 => Some(Self::UnsupportedVersion),
            5 => Some(Self::Cancel),
            6 => Some(Self::InternalError),
            7 => Some(Self::FlowControlError),
            8 => Some(Self::StreamInUse),
            9 => Some(Self::StreamAlreadyClosed),
            10 => Some(Self::InvalidCredentials),
            11 => Some(Self::FrameTooLarge),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A parsed 8-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    Control {
        version: u16,
        control_type: u16,
        flags: u8,
        length: u32,
    },
    Data {
        stream_id: u32,
        flags: u8,
        length: u32,
    },
}

impl FrameHeader {
    /// Parse the first 8 bytes of `data`. Returns `None` if fewer are present.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_LEN {
            return None;
        }

        let word0 = read_u32(data, 0);
        let flags = data[4];
        let length = read_u32(data, 4) & MAX_FRAME_LENGTH;

        if data[0] & flags::CONTROL != 0 {
            Some(Self::Control {
                version: ((word0 >> 16) & 0x7fff) as u16,
                control_type: word0 as u16,
                flags,
                length,
            })
        } else {
            Some(Self::Data {
                stream_id: word0 & 0x7fff_ffff,
                flags,
                length,
            })
        }
    }

    pub fn length(&self) -> u32 {
        match *self {
            Self::Control { length, .. } | Self::Data { length, .. } => length,
        }
    }

    pub fn flags(&self) -> u8 {
        match *self {
            Self::Control { flags, .. } | Self::Data { flags, .. } => flags,
        }
    }

    /// Check if the FIN flag is set
    pub fn is_fin(&self) -> bool {
        self.flags() & flags::FIN != 0
    }

    /// Total frame size including header
    pub fn total_size(&self) -> usize {
        FRAME_HEADER_LEN + self.length() as usize
    }
}

/// Read a big-endian u32 at `offset`. Panics if out of range; callers check lengths first.
pub fn read_u32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Append a control frame header.
pub fn write_control_header(buf: &mut Vec<u8>, control_type: ControlType, flags: u8, length: u32) {
    let word0 = 0x8000_0000 | (u32::from(SPDY_VERSION) << 16) | u32::from(control_type.as_u16());
    buf.extend_from_slice(&word0.to_be_bytes());
    buf.extend_from_slice(&((u32::from(flags) << 24) | (length & MAX_FRAME_LENGTH)).to_be_bytes());
}

/// Append a data frame header.
pub fn write_data_header(buf: &mut Vec<u8>, stream_id: u32, flags: u8, length: u32) {
    buf.extend_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    buf.extend_from_slice(&((u32::from(flags) << 24) | (length & MAX_FRAME_LENGTH)).to_be_bytes());
}

/// Overwrite the flags/length word of a frame that starts at `buf[0]`.
pub fn patch_flags_and_length(buf: &mut [u8], flags: u8, length: u32) {
    let word1 = (u32::from(flags) << 24) | (length & MAX_FRAME_LENGTH);
    buf[4..8].copy_from_slice(&word1.to_be_bytes());
}

/// Create a complete control frame around `payload`.
pub fn create_control_frame(control_type: ControlType, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    write_control_header(&mut frame, control_type, flags, payload.len() as u32);
    frame.extend_from_slice(payload);
    frame
}

/// Create a complete data frame around `payload`.
pub fn create_data_frame(stream_id: u32, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    let flags = if fin { flags::FIN } else { 0 };
    write_data_header(&mut frame, stream_id, flags, payload.len() as u32);
    frame.extend_from_slice(payload);
    frame
}

/// Create a RST_STREAM frame (16 bytes)
pub fn create_rst_stream(stream_id: u32, code: RstCode) -> Vec<u8> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    payload[4..].copy_from_slice(&code.as_u32().to_be_bytes());
    create_control_frame(ControlType::RstStream, 0, &payload)
}

/// Create a PING frame (12 bytes)
pub fn create_ping(id: u32) -> Vec<u8> {
    create_control_frame(ControlType::Ping, 0, &id.to_be_bytes())
}

/// Create a GOAWAY frame (12 bytes). The client never accepts pushed
/// streams, so its last-good ID is always 0.
pub fn create_goaway(last_good_stream_id: u32) -> Vec<u8> {
    create_control_frame(
        ControlType::GoAway,
        0,
        &(last_good_stream_id & 0x7fff_ffff).to_be_bytes(),
    )
}

/// Create a SETTINGS frame from `(flags, id, value)` entries
pub fn create_settings(entries: &[(u8, u32, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + entries.len() * 8);
    payload.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for &(flags, id, value) in entries {
        let word = (u32::from(flags) << 24) | (id & 0x00ff_ffff);
        payload.extend_from_slice(&word.to_be_bytes());
        payload.extend_from_slice(&value.to_be_bytes());
    }
    create_control_frame(ControlType::Settings, 0, &payload)
}

/// Create a WINDOW_UPDATE frame (16 bytes)
pub fn create_window_update(stream_id: u32, delta: u32) -> Vec<u8> {
    let mut payload = [0u8; 8];
    payload[..4].copy_from_slice(&(stream_id & 0x7fff_ffff).to_be_bytes());
    payload[4..].copy_from_slice(&(delta & 0x7fff_ffff).to_be_bytes());
    create_control_frame(ControlType::WindowUpdate, 0, &payload)
}
