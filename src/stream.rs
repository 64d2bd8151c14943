//! One multiplexed request/response exchange.
//!
//! A stream owns the upstream (send) state machine that turns an HTTP/1
//! request from its transaction into a SYN_STREAM frame and DATA frames, its
//! flow-control windows, and the buffer that collects decompressed response
//! headers until they can be flattened back into an HTTP/1 header block.
//! The session drives the receive side.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::io::Write;

use tracing::{debug, trace};

use crate::compress::{
    find_header, merge_header_value, parse_header_blocks, split_header_values, HeaderCompressor,
    HeaderDecompressor,
};
use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{CloseReason, CompressionError, StreamError};
use crate::frame::{
    flags, patch_flags_and_length, write_control_header, write_data_header, ControlType,
    MAX_STREAM_ID,
};
use crate::output::{IoStatus, OutputQueue};
use crate::transaction::{RequestSegment, ResponseFlow, Transaction, TransportStatus};

/// Opaque identity of a stream (and of the transaction it carries) within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(pub(crate) u64);

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wire identity of a stream. IDs are handed out only once the SYN_STREAM
/// frame is built, so a queued or half-parsed request has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamId {
    Pending,
    Assigned(u32),
}

impl StreamId {
    pub fn get(self) -> Option<u32> {
        match self {
            Self::Pending => None,
            Self::Assigned(id) => Some(id),
        }
    }
}

/// Upstream (send side) states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamState {
    GeneratingSynStream,
    SendingSynStream,
    GeneratingRequestBody,
    SendingRequestBody,
    SendingFinStream,
    UpstreamComplete,
}

impl UpstreamState {
    fn name(self) -> &'static str {
        match self {
            Self::GeneratingSynStream => "GENERATING_SYN_STREAM",
            Self::SendingSynStream => "SENDING_SYN_STREAM",
            Self::GeneratingRequestBody => "GENERATING_REQUEST_BODY",
            Self::SendingRequestBody => "SENDING_REQUEST_BODY",
            Self::SendingFinStream => "SENDING_FIN_STREAM",
            Self::UpstreamComplete => "UPSTREAM_COMPLETE",
        }
    }
}

/// Request headers that have no meaning on a SPDY stream.
const EXCLUDED_REQUEST_HEADERS: &[&[u8]] = &[
    b"connection",
    b"keep-alive",
    b"host",
    b"proxy-connection",
    b"accept-encoding",
    b"te",
    b"transfer-encoding",
];

/// Session state a stream may touch while producing output.
pub(crate) struct SendContext<'a, W> {
    pub writer: &'a mut W,
    pub output: &'a mut OutputQueue,
    pub compressor: &'a mut HeaderCompressor,
    pub next_stream_id: &'a mut u32,
    pub streams_by_id: &'a mut HashMap<u32, StreamHandle>,
    pub ready_for_write: &'a mut VecDeque<StreamHandle>,
    pub should_go_away: &'a mut bool,
}

impl<W: Write> SendContext<'_, W> {
    /// Hand out the next client stream ID and make the stream reachable by it.
    fn register_stream_id(&mut self, handle: StreamHandle) -> Result<u32, StreamError> {
        let id = *self.next_stream_id;
        if id & 1 == 0 || id >= 0x8000_0000 {
            *self.should_go_away = true;
            return Err(StreamError::StreamIdsExhausted);
        }

        *self.next_stream_id = id + 2;
        if *self.next_stream_id >= MAX_STREAM_ID {
            debug!(next_stream_id = *self.next_stream_id, "stream ID space nearly exhausted");
            *self.should_go_away = true;
        }

        if self.streams_by_id.contains_key(&id) {
            *self.should_go_away = true;
            return Err(StreamError::DuplicateStreamId(id));
        }
        self.streams_by_id.insert(id, handle);
        Ok(id)
    }

    fn queue_for_write(&mut self, handle: StreamHandle) {
        queue_for_write(self.ready_for_write, handle);
    }
}

pub(crate) fn queue_for_write(queue: &mut VecDeque<StreamHandle>, handle: StreamHandle) {
    if !queue.contains(&handle) {
        queue.push_back(handle);
    }
}

/// Map a transaction priority in `-20..=20` onto the 3-bit SPDY priority
/// (0 is most urgent).
pub fn spdy_priority(priority: i32) -> u8 {
    if priority >= 20 {
        7
    } else if priority <= -20 {
        0
    } else {
        // +1 keeps neighbours such as -10 and -11 apart
        (3 + (priority + 1) / 5) as u8
    }
}

pub(crate) struct Stream<T> {
    pub handle: StreamHandle,
    pub id: StreamId,
    transaction: T,
    priority: i32,
    pub upstream_state: UpstreamState,
    chunk_size: usize,
    coalesce: bool,
    /// Counted against the session's concurrency limit.
    pub activated: bool,

    tx_inline_frame: Vec<u8>,
    tx_stream_frame_size: usize,
    flat_request_headers: Vec<u8>,
    request_body_len_remaining: Option<u64>,

    syn_frame_complete: bool,
    pub request_blocked_on_read: bool,
    pub blocked_on_rwin: bool,
    sent_fin_on_data: bool,
    sent_waiting_for: bool,
    pub recvd_fin: bool,
    pub recvd_data: bool,
    pub fully_open: bool,

    decompress_buffer: Vec<u8>,
    decompressed_bytes: u64,

    pub remote_window: i64,
    pub local_window: i64,
    pub local_unacked: u64,

    total_sent: u64,
    total_read: u64,
}

impl<T: Transaction> Stream<T> {
    pub fn new(
        handle: StreamHandle,
        transaction: T,
        priority: i32,
        chunk_size: usize,
        coalesce: bool,
        remote_window: i64,
        local_window: i64,
    ) -> Self {
        Self {
            handle,
            id: StreamId::Pending,
            transaction,
            priority,
            upstream_state: UpstreamState::GeneratingSynStream,
            chunk_size,
            coalesce,
            activated: false,
            tx_inline_frame: Vec::with_capacity(DEFAULT_BUFFER_SIZE),
            tx_stream_frame_size: 0,
            flat_request_headers: Vec::new(),
            request_body_len_remaining: None,
            syn_frame_complete: false,
            request_blocked_on_read: false,
            blocked_on_rwin: false,
            sent_fin_on_data: false,
            sent_waiting_for: false,
            recvd_fin: false,
            recvd_data: false,
            fully_open: false,
            decompress_buffer: Vec::new(),
            decompressed_bytes: 0,
            remote_window,
            local_window,
            local_unacked: 0,
            total_sent: 0,
            total_read: 0,
        }
    }

    pub fn transaction_mut(&mut self) -> &mut T {
        &mut self.transaction
    }

    fn change_state(&mut self, state: UpstreamState) {
        trace!(
            stream = %self.handle,
            from = self.upstream_state.name(),
            to = state.name(),
            "upstream state change"
        );
        self.upstream_state = state;
    }

    // ========================================================================
    // Send side
    // ========================================================================

    /// Produce up to `count` request bytes as frames.
    pub fn read_segments<W: Write>(
        &mut self,
        cx: &mut SendContext<'_, W>,
        count: usize,
    ) -> Result<IoStatus, StreamError> {
        self.request_blocked_on_read = false;

        match self.upstream_state {
            UpstreamState::GeneratingSynStream
            | UpstreamState::GeneratingRequestBody
            | UpstreamState::SendingRequestBody => {
                // A frame whose body was already coalesced behind its header
                // goes out before anything new is pulled.
                if self.upstream_state == UpstreamState::SendingRequestBody
                    && self.tx_stream_frame_size == 0
                    && !self.tx_inline_frame.is_empty()
                {
                    let (status, _) = self.transmit_frame(cx, None)?;
                    if status == IoStatus::WouldBlock {
                        return Ok(IoStatus::WouldBlock);
                    }
                    self.change_state(UpstreamState::GeneratingRequestBody);
                }

                let (mut status, count_read) = self.pull_request(cx, count)?;

                if status != IoStatus::WouldBlock
                    && self.upstream_state == UpstreamState::GeneratingSynStream
                    && !self.syn_frame_complete
                {
                    cx.queue_for_write(self.handle);
                }

                if status == IoStatus::WouldBlock && self.tx_inline_frame.is_empty() {
                    self.request_blocked_on_read = true;
                }

                if self.tx_inline_frame.is_empty() && status != IoStatus::WouldBlock && count_read == 0 {
                    debug!(stream = %self.handle, "request body complete");
                    if self.sent_fin_on_data {
                        self.change_state(UpstreamState::UpstreamComplete);
                    } else {
                        self.generate_data_frame_header(0, true)?;
                        self.change_state(UpstreamState::SendingFinStream);
                        cx.queue_for_write(self.handle);
                        status = IoStatus::WouldBlock;
                    }
                }
                Ok(status)
            }

            UpstreamState::SendingSynStream => {
                cx.output.flush(cx.writer)?;
                if !cx.output.is_empty() {
                    cx.queue_for_write(self.handle);
                    return Ok(IoStatus::WouldBlock);
                }
                if self.sent_fin_on_data {
                    self.change_state(UpstreamState::UpstreamComplete);
                    Ok(IoStatus::Transferred(0))
                } else {
                    self.change_state(UpstreamState::GeneratingRequestBody);
                    cx.queue_for_write(self.handle);
                    Ok(IoStatus::WouldBlock)
                }
            }

            UpstreamState::SendingFinStream => {
                if !self.sent_fin_on_data {
                    let (status, _) = self.transmit_frame(cx, None)?;
                    if status == IoStatus::WouldBlock {
                        return Ok(IoStatus::WouldBlock);
                    }
                }
                self.sent_fin_on_data = true;
                self.change_state(UpstreamState::UpstreamComplete);
                Ok(IoStatus::Transferred(0))
            }

            UpstreamState::UpstreamComplete => Ok(IoStatus::Transferred(0)),
        }
    }

    /// Offer the transaction's request bytes to [`on_read_segment`](Self::on_read_segment)
    /// until it stops taking them.
    fn pull_request<W: Write>(
        &mut self,
        cx: &mut SendContext<'_, W>,
        count: usize,
    ) -> Result<(IoStatus, usize), StreamError> {
        let mut total = 0;

        while total < count {
            let limit = self.segment_limit(count - total);
            let segment = match self.transaction.request_segment() {
                RequestSegment::Data(data) if !data.is_empty() => {
                    data[..data.len().min(limit)].to_vec()
                }
                RequestSegment::Data(_) | RequestSegment::WouldBlock => break,
                RequestSegment::End => {
                    if self.upstream_state == UpstreamState::GeneratingSynStream {
                        return Err(StreamError::IncompleteRequestHeaders);
                    }
                    return Ok((IoStatus::Transferred(total), total));
                }
            };

            let (status, used) = self.on_read_segment(cx, &segment)?;
            if used > 0 {
                self.transaction.consume_request(used);
                total += used;
            }
            if status == IoStatus::WouldBlock || used == 0 {
                break;
            }
        }

        if total > 0 {
            Ok((IoStatus::Transferred(total), total))
        } else {
            Ok((IoStatus::WouldBlock, 0))
        }
    }

    /// How many of the transaction's bytes the next [`on_read_segment`](Self::on_read_segment)
    /// call can use. Body states take at most one DATA frame's worth.
    fn segment_limit(&self, budget: usize) -> usize {
        match self.upstream_state {
            // A frame header already promised its full body.
            UpstreamState::SendingRequestBody if self.tx_stream_frame_size > 0 => {
                self.tx_stream_frame_size
            }
            UpstreamState::GeneratingRequestBody | UpstreamState::SendingRequestBody => budget
                .min(self.chunk_size)
                .min(self.remote_window.max(0) as usize),
            _ => budget,
        }
    }

    /// Consume request bytes according to the upstream state. Returns how
    /// many bytes of `buf` were used.
    fn on_read_segment<W: Write>(
        &mut self,
        cx: &mut SendContext<'_, W>,
        buf: &[u8],
    ) -> Result<(IoStatus, usize), StreamError> {
        match self.upstream_state {
            UpstreamState::GeneratingSynStream => {
                let used = self.parse_request_headers(cx, buf)?;
                if !self.syn_frame_complete {
                    return Ok((IoStatus::Transferred(used), used));
                }

                if self.queue_syn_stream(cx)? {
                    self.change_state(UpstreamState::GeneratingRequestBody);
                } else {
                    self.change_state(UpstreamState::SendingSynStream);
                }
                // The header bytes are spoken for even if the frame is still queued.
                Ok((IoStatus::Transferred(used), used))
            }

            UpstreamState::GeneratingRequestBody => {
                if self.remote_window <= 0 {
                    self.blocked_on_rwin = true;
                    debug!(
                        stream = %self.handle,
                        remote_window = self.remote_window,
                        "request body blocked on remote window"
                    );
                    return Ok((IoStatus::WouldBlock, 0));
                }
                self.blocked_on_rwin = false;

                let len = buf
                    .len()
                    .min(self.chunk_size)
                    .min(self.remote_window as usize);
                self.remote_window -= len as i64;

                let last = match self.request_body_len_remaining {
                    Some(remaining) => {
                        if len as u64 > remaining {
                            return Err(StreamError::BodyTooLong(len as u64 - remaining));
                        }
                        self.request_body_len_remaining = Some(remaining - len as u64);
                        remaining == len as u64
                    }
                    None => false,
                };

                self.generate_data_frame_header(len, last)?;
                self.change_state(UpstreamState::SendingRequestBody);
                self.send_request_body(cx, buf)
            }

            UpstreamState::SendingRequestBody => self.send_request_body(cx, buf),

            UpstreamState::SendingSynStream => Ok((IoStatus::WouldBlock, 0)),

            state => Err(StreamError::UnexpectedState(state.name())),
        }
    }

    fn send_request_body<W: Write>(
        &mut self,
        cx: &mut SendContext<'_, W>,
        buf: &[u8],
    ) -> Result<(IoStatus, usize), StreamError> {
        let (status, used) = self.transmit_frame(cx, Some(buf))?;
        if status == IoStatus::WouldBlock {
            let status = if used > 0 {
                IoStatus::Transferred(used)
            } else {
                IoStatus::WouldBlock
            };
            return Ok((status, used));
        }

        self.change_state(UpstreamState::GeneratingRequestBody);
        if used == 0 && !buf.is_empty() {
            // The frame that just left carried none of this segment.
            return self.on_read_segment(cx, buf);
        }
        Ok((IoStatus::Transferred(used), used))
    }

    /// Buffer the request head until the blank line, then build the
    /// SYN_STREAM frame. Returns how many bytes of `buf` belong to the head.
    fn parse_request_headers<W: Write>(
        &mut self,
        cx: &mut SendContext<'_, W>,
        buf: &[u8],
    ) -> Result<usize, StreamError> {
        let old_len = self.flat_request_headers.len();
        self.flat_request_headers.extend_from_slice(buf);

        let search_from = old_len.saturating_sub(3);
        let end = match find(&self.flat_request_headers[search_from..], b"\r\n\r\n") {
            Some(pos) => search_from + pos,
            None => return Ok(buf.len()),
        };

        // Keep the CRLF that ends the last header line.
        self.flat_request_headers.truncate(end + 2);
        let used = end + 4 - old_len;
        self.syn_frame_complete = true;

        let flat = &self.flat_request_headers;
        let line_end = find(flat, b"\r\n").unwrap_or(flat.len());
        let mut request_line = flat[..line_end].split(|&b| b == b' ').filter(|s| !s.is_empty());
        let method = request_line.next().ok_or(StreamError::MalformedRequestLine)?;
        let path = request_line.next().ok_or(StreamError::MalformedRequestLine)?;
        let version: &[u8] = match request_line.next() {
            Some(b"HTTP/1.1") => b"HTTP/1.1",
            _ => b"HTTP/1.0",
        };

        let mut host: &[u8] = b"";
        let mut content_length = None;
        let mut headers: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();

        let mut start = line_end + 2;
        while start < flat.len() {
            let crlf = match find(&flat[start..], b"\r\n") {
                Some(pos) => start + pos,
                None => break,
            };
            let line = &flat[start..crlf];
            start = crlf + 2;

            let colon = match line.iter().position(|&b| b == b':') {
                Some(pos) => pos,
                None => break,
            };
            let name = line[..colon].to_ascii_lowercase();
            let value = trim_leading_spaces(&line[colon + 1..]);

            if name == b"host" {
                host = value;
            }
            if EXCLUDED_REQUEST_HEADERS.contains(&name.as_slice()) {
                continue;
            }
            if name == b"content-length" {
                content_length = std::str::from_utf8(value)
                    .ok()
                    .and_then(|v| v.trim().parse::<u64>().ok());
            }
            merge_header_value(&mut headers, &name, value);
        }

        let mut pairs: Vec<(&[u8], &[u8])> = Vec::with_capacity(headers.len() + 5);
        pairs.push((b":method".as_slice(), method));
        pairs.push((b":path".as_slice(), path));
        pairs.push((b":version".as_slice(), version));
        pairs.push((b":host".as_slice(), host));
        pairs.push((b":scheme".as_slice(), b"https".as_slice()));
        pairs.extend(headers.iter().map(|(n, v)| (n.as_slice(), v.as_slice())));

        // The ID is taken only once the frame is certain to be built, right
        // before its block enters the shared deflate context.
        let id = cx.register_stream_id(self.handle)?;

        let mut frame = Vec::with_capacity(DEFAULT_BUFFER_SIZE);
        write_control_header(&mut frame, ControlType::SynStream, 0, 0);
        frame.extend_from_slice(&id.to_be_bytes());
        // associated-to stream, unused by a client
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.push(spdy_priority(self.priority) << 5);
        // credential slot
        frame.push(0);
        cx.compressor.compress_headers(&pairs, &mut frame)?;

        let fin = match method {
            b"GET" | b"HEAD" | b"CONNECT" => true,
            // FIN rides on a DATA frame even for empty bodies
            b"POST" | b"PUT" | b"OPTIONS" => false,
            _ => content_length.unwrap_or(0) == 0,
        };

        let length = (frame.len() - 8) as u32;
        patch_flags_and_length(&mut frame, if fin { flags::FIN } else { 0 }, length);
        debug!(
            stream = %self.handle,
            stream_id = id,
            length,
            fin,
            "SYN_STREAM generated"
        );

        self.id = StreamId::Assigned(id);
        self.request_body_len_remaining = content_length;
        self.sent_fin_on_data = fin;
        self.tx_inline_frame = frame;
        self.tx_stream_frame_size = 0;
        Ok(used)
    }

    fn generate_data_frame_header(&mut self, len: usize, last: bool) -> Result<(), StreamError> {
        let id = self
            .id
            .get()
            .ok_or(StreamError::UnexpectedState(self.upstream_state.name()))?;

        let mut frame_flags = 0;
        if last {
            frame_flags |= flags::FIN;
            // An empty FIN frame still has to be sent on its own.
            if len > 0 {
                self.sent_fin_on_data = true;
            }
        }

        self.tx_inline_frame.clear();
        write_data_header(&mut self.tx_inline_frame, id, frame_flags, len as u32);
        self.tx_stream_frame_size = len;
        trace!(stream_id = id, len, last, "DATA frame header generated");
        Ok(())
    }

    /// Move the pending frame (inline header plus `tx_stream_frame_size`
    /// bytes of `buf`) into the session output. Returns how many bytes of
    /// `buf` were used.
    fn transmit_frame<W: Write>(
        &mut self,
        cx: &mut SendContext<'_, W>,
        buf: Option<&[u8]>,
    ) -> Result<(IoStatus, usize), StreamError> {
        let body = buf.unwrap_or(&[]);
        if self.tx_stream_frame_size > body.len() {
            return Err(StreamError::UnexpectedState(self.upstream_state.name()));
        }

        let mut used = 0;
        if self.coalesce
            && self.tx_stream_frame_size > 0
            && !self.tx_inline_frame.is_empty()
            && self.tx_inline_frame.len() + self.tx_stream_frame_size <= DEFAULT_BUFFER_SIZE
        {
            self.tx_inline_frame
                .extend_from_slice(&body[..self.tx_stream_frame_size]);
            used = self.tx_stream_frame_size;
            self.tx_stream_frame_size = 0;
        }

        let total = self.tx_inline_frame.len() + self.tx_stream_frame_size;
        if !cx.output.commit_to_segment_size(cx.writer, total)? {
            cx.queue_for_write(self.handle);
            return Ok((IoStatus::WouldBlock, used));
        }

        log_io(self.id, "inline frame", &self.tx_inline_frame);
        if cx.output.write_through(cx.writer, &self.tx_inline_frame)? == IoStatus::WouldBlock {
            return Err(StreamError::UnexpectedState("output queue refused a committed frame"));
        }

        if self.tx_stream_frame_size > 0 {
            let data = &body[..self.tx_stream_frame_size];
            log_io(self.id, "stream frame", data);
            if cx.output.write_through(cx.writer, data)? == IoStatus::WouldBlock {
                return Err(StreamError::UnexpectedState("output queue refused a committed frame"));
            }
            used += self.tx_stream_frame_size;
        }

        self.tx_inline_frame.clear();
        self.tx_stream_frame_size = 0;
        self.update_transport_send_events(total as u64);
        Ok((IoStatus::Transferred(used), used))
    }

    /// Commit the compressed SYN_STREAM to the session output. A deflated
    /// header block cannot be held back, or a later stream's block would
    /// reach the peer first. Returns whether the frame left the queue.
    fn queue_syn_stream<W: Write>(&mut self, cx: &mut SendContext<'_, W>) -> Result<bool, StreamError> {
        let total = self.tx_inline_frame.len();
        log_io(self.id, "inline frame", &self.tx_inline_frame);
        cx.output.push(&self.tx_inline_frame);
        self.tx_inline_frame.clear();
        self.tx_stream_frame_size = 0;

        cx.output.flush(cx.writer)?;
        self.update_transport_send_events(total as u64);
        Ok(cx.output.is_empty())
    }

    fn update_transport_send_events(&mut self, count: u64) {
        self.total_sent += count;

        if self.upstream_state != UpstreamState::SendingFinStream {
            self.transaction
                .on_transport_status(TransportStatus::SendingTo, self.total_sent);
        }

        if !self.sent_waiting_for && self.request_body_len_remaining.unwrap_or(0) == 0 {
            self.sent_waiting_for = true;
            self.transaction
                .on_transport_status(TransportStatus::WaitingFor, 0);
        }
    }

    // ========================================================================
    // Receive side
    // ========================================================================

    /// Inflate a header block fragment into this stream's buffer.
    pub fn uncompress(
        &mut self,
        decompressor: &mut HeaderDecompressor,
        block: &[u8],
    ) -> Result<(), CompressionError> {
        self.decompressed_bytes += block.len() as u64;
        decompressor.decompress(block, &mut self.decompress_buffer)
    }

    /// Flatten the collected name/value pairs into an HTTP/1 response head.
    /// The decompression buffer is released either way.
    pub fn convert_headers(&mut self) -> Result<Vec<u8>, StreamError> {
        let buffer = std::mem::take(&mut self.decompress_buffer);
        let pairs = parse_header_blocks(&buffer)?;

        let status = find_header(&pairs, b":status").ok_or(StreamError::MissingHeader(":status"))?;
        let version =
            find_header(&pairs, b":version").ok_or(StreamError::MissingHeader(":version"))?;

        let mut out = Vec::with_capacity(buffer.len() + 64);
        out.extend_from_slice(version);
        out.push(b' ');
        out.extend_from_slice(status);
        out.extend_from_slice(b"\r\n");

        for &(name, value) in &pairs {
            if name.iter().any(|&b| b.is_ascii_uppercase() || b == 0) {
                return Err(StreamError::IllegalHeaderName);
            }
            if name == b"transfer-encoding" {
                return Err(StreamError::TransferEncoding);
            }
            if matches!(name, b":version" | b":status" | b"connection" | b"keep-alive") {
                continue;
            }

            for (i, part) in split_header_values(value).enumerate() {
                if i > 0 {
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(name);
                out.extend_from_slice(b": ");
                out.extend_from_slice(part);
            }
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(b"\r\n");

        debug!(
            stream = %self.handle,
            compressed = self.decompressed_bytes,
            flattened = out.len(),
            "response headers converted"
        );
        Ok(out)
    }

    pub fn write_response(&mut self, data: &[u8]) -> ResponseFlow {
        self.transaction.write_response_segment(data)
    }

    pub fn update_transport_read_events(&mut self, count: u64) {
        self.total_read += count;
        self.transaction
            .on_transport_status(TransportStatus::ReceivingFrom, self.total_read);
    }

    pub fn on_transport_status(&mut self, status: TransportStatus, progress: u64) {
        self.transaction.on_transport_status(status, progress);
    }

    // ========================================================================
    // Flow control
    // ========================================================================

    pub fn update_remote_window(&mut self, delta: i64) {
        self.remote_window += delta;
    }

    pub fn decrement_local_window(&mut self, bytes: u64) {
        self.local_window -= bytes as i64;
        self.local_unacked += bytes;
    }

    pub fn increment_local_window(&mut self, bytes: u64) {
        self.local_window += bytes as i64;
        self.local_unacked = self.local_unacked.saturating_sub(bytes);
    }

    pub fn close(&mut self, reason: CloseReason) {
        debug!(stream = %self.handle, stream_id = ?self.id.get(), %reason, "stream closed");
        self.transaction.close(reason);
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn trim_leading_spaces(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|&b| b != b' ').unwrap_or(value.len());
    &value[start..]
}

/// Hex dump of outgoing bytes at trace level.
fn log_io(id: StreamId, label: &str, data: &[u8]) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    for (line, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        trace!(stream_id = ?id.get(), label, offset = line * 16, "{}", hex.join(" "));
    }
}
