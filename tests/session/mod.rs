//! Session integration tests: a recording transaction on one side, a
//! scripted server on the other.

use std::cell::RefCell;
use std::rc::Rc;

use spdy_sans_io::compress::parse_name_value_block;
use spdy_sans_io::frame::{create_control_frame, read_u32};
use spdy_sans_io::{
    flags, CloseReason, ControlType, FrameHeader, HeaderCompressor, HeaderDecompressor,
    RequestSegment, ResponseFlow, Session, SessionConfig, StreamHandle, Transaction,
    TransportStatus,
};

mod keepalive;
mod lifecycle;

pub const OK: &[(&str, &str)] = &[(":status", "200 OK"), (":version", "HTTP/1.1")];

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Recording transaction
// ============================================================================

#[derive(Debug, Default)]
pub struct Record {
    pub response: Vec<u8>,
    pub closed: Option<CloseReason>,
    pub close_count: usize,
    pub statuses: Vec<TransportStatus>,
}

pub type Shared = Rc<RefCell<Record>>;

pub struct MockTransaction {
    request: Vec<u8>,
    sent: usize,
    finished: bool,
    done_after: Option<usize>,
    record: Shared,
}

impl MockTransaction {
    /// A transaction whose whole request is available up front.
    pub fn new(request: &[u8]) -> (Self, Shared) {
        Self::build(request, true)
    }

    /// A transaction that would-block once `request` is consumed, until
    /// [`push`](Self::push) or [`finish`](Self::finish) is called.
    pub fn streaming(request: &[u8]) -> (Self, Shared) {
        Self::build(request, false)
    }

    fn build(request: &[u8], finished: bool) -> (Self, Shared) {
        let record = Shared::default();
        let txn = Self {
            request: request.to_vec(),
            sent: 0,
            finished,
            done_after: None,
            record: record.clone(),
        };
        (txn, record)
    }

    pub fn done_after(mut self, bytes: usize) -> Self {
        self.done_after = Some(bytes);
        self
    }

    pub fn push(&mut self, more: &[u8]) {
        self.request.extend_from_slice(more);
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }
}

impl Transaction for MockTransaction {
    fn request_segment(&mut self) -> RequestSegment<'_> {
        if self.sent < self.request.len() {
            RequestSegment::Data(&self.request[self.sent..])
        } else if self.finished {
            RequestSegment::End
        } else {
            RequestSegment::WouldBlock
        }
    }

    fn consume_request(&mut self, count: usize) {
        self.sent += count;
    }

    fn write_response_segment(&mut self, data: &[u8]) -> ResponseFlow {
        let mut record = self.record.borrow_mut();
        record.response.extend_from_slice(data);
        match self.done_after {
            Some(limit) if record.response.len() >= limit => ResponseFlow::Done,
            _ => ResponseFlow::Continue,
        }
    }

    fn on_transport_status(&mut self, status: TransportStatus, _progress: u64) {
        self.record.borrow_mut().statuses.push(status);
    }

    fn close(&mut self, reason: CloseReason) {
        let mut record = self.record.borrow_mut();
        record.closed = Some(reason);
        record.close_count += 1;
    }
}

pub fn closed(record: &Shared) -> Option<CloseReason> {
    record.borrow().closed
}

pub fn response(record: &Shared) -> String {
    String::from_utf8_lossy(&record.borrow().response).into_owned()
}

// ============================================================================
// Requests
// ============================================================================

pub fn get_request(path: &str) -> Vec<u8> {
    format!(
        "GET {path} HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\nConnection: keep-alive\r\n\r\n"
    )
    .into_bytes()
}

pub fn post_request(path: &str, body: &[u8]) -> Vec<u8> {
    let mut request = format!(
        "POST {path} HTTP/1.1\r\nHost: example.com\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    request.extend_from_slice(body);
    request
}

// ============================================================================
// Session helpers
// ============================================================================

pub type Client = Session<MockTransaction>;

pub fn client() -> Client {
    client_with(SessionConfig::default())
}

pub fn client_with(config: SessionConfig) -> Client {
    init_tracing();
    Session::new(config)
}

/// Run the write path to completion and split what it produced into frames.
pub fn drain(session: &mut Client) -> Vec<WireFrame> {
    let mut out = Vec::new();
    session.flush(&mut out).unwrap();
    split_frames(&out)
}

pub fn open_get(session: &mut Client, path: &str) -> (StreamHandle, Shared) {
    let (txn, record) = MockTransaction::new(&get_request(path));
    let handle = session.add_stream(txn, 0).unwrap();
    (handle, record)
}

// ============================================================================
// Wire frames
// ============================================================================

#[derive(Debug, Clone)]
pub struct WireFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl WireFrame {
    pub fn control_type(&self) -> Option<ControlType> {
        match self.header {
            FrameHeader::Control { control_type, .. } => ControlType::from_u16(control_type),
            FrameHeader::Data { .. } => None,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self.header, FrameHeader::Data { .. })
    }

    pub fn stream_id(&self) -> u32 {
        match self.header {
            FrameHeader::Data { stream_id, .. } => stream_id,
            FrameHeader::Control { .. } => read_u32(&self.payload, 0) & 0x7fff_ffff,
        }
    }

    /// The `index`th 32-bit word of the payload.
    pub fn word(&self, index: usize) -> u32 {
        read_u32(&self.payload, index * 4)
    }
}

pub fn split_frames(mut bytes: &[u8]) -> Vec<WireFrame> {
    let mut frames = Vec::new();
    while !bytes.is_empty() {
        let header = FrameHeader::parse(bytes).expect("complete frame header");
        let total = header.total_size();
        frames.push(WireFrame {
            header,
            payload: bytes[8..total].to_vec(),
        });
        bytes = &bytes[total..];
    }
    frames
}

pub fn of_type(frames: &[WireFrame], control_type: ControlType) -> Vec<&WireFrame> {
    frames
        .iter()
        .filter(|f| f.control_type() == Some(control_type))
        .collect()
}

/// `(stream_id, status_code)` of every RST_STREAM frame.
pub fn rsts(frames: &[WireFrame]) -> Vec<(u32, u32)> {
    of_type(frames, ControlType::RstStream)
        .into_iter()
        .map(|f| (f.word(0), f.word(1)))
        .collect()
}

pub fn data_frames(frames: &[WireFrame]) -> Vec<&WireFrame> {
    frames.iter().filter(|f| f.is_data()).collect()
}

// ============================================================================
// Scripted server
// ============================================================================

/// The server's half of the two shared compression contexts.
pub struct Server {
    compressor: HeaderCompressor,
    decompressor: HeaderDecompressor,
}

impl Server {
    pub fn new() -> Self {
        Self {
            compressor: HeaderCompressor::new(),
            decompressor: HeaderDecompressor::new(),
        }
    }

    pub fn header_block(&mut self, headers: &[(&str, &str)]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|(n, v)| (n.as_bytes(), v.as_bytes()))
            .collect();
        let mut out = Vec::new();
        self.compressor.compress_headers(&pairs, &mut out).unwrap();
        out
    }

    pub fn reply_frame(
        &mut self,
        control_type: ControlType,
        stream_id: u32,
        headers: &[(&str, &str)],
        frame_flags: u8,
    ) -> Vec<u8> {
        let mut payload = stream_id.to_be_bytes().to_vec();
        payload.extend_from_slice(&self.header_block(headers));
        create_control_frame(control_type, frame_flags, &payload)
    }

    pub fn syn_reply(&mut self, stream_id: u32, headers: &[(&str, &str)], fin: bool) -> Vec<u8> {
        let frame_flags = if fin { flags::FIN } else { 0 };
        self.reply_frame(ControlType::SynReply, stream_id, headers, frame_flags)
    }

    pub fn headers(&mut self, stream_id: u32, headers: &[(&str, &str)], fin: bool) -> Vec<u8> {
        let frame_flags = if fin { flags::FIN } else { 0 };
        self.reply_frame(ControlType::Headers, stream_id, headers, frame_flags)
    }

    pub fn syn_stream(&mut self, stream_id: u32, associated: u32, headers: &[(&str, &str)]) -> Vec<u8> {
        let mut payload = stream_id.to_be_bytes().to_vec();
        payload.extend_from_slice(&associated.to_be_bytes());
        payload.extend_from_slice(&[0, 0]);
        payload.extend_from_slice(&self.header_block(headers));
        create_control_frame(ControlType::SynStream, 0, &payload)
    }

    /// Decode the request headers of a client SYN_STREAM. Must be called for
    /// every SYN_STREAM in wire order.
    pub fn decode_request(&mut self, syn: &WireFrame) -> Vec<(String, String)> {
        let mut block = Vec::new();
        self.decompressor
            .decompress(&syn.payload[10..], &mut block)
            .unwrap();
        parse_name_value_block(&block)
            .unwrap()
            .into_iter()
            .map(|(n, v)| {
                (
                    String::from_utf8_lossy(n).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )
            })
            .collect()
    }
}
