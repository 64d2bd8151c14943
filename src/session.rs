//! The SPDY/3 client session.
//!
//! A [`Session`] multiplexes any number of [`Transaction`]s over one
//! transport connection. The caller owns the socket and drives two entry
//! points:
//!
//! - [`Session::write_segments`] moves bytes *from* the network into the
//!   session (frame parsing, control frame handling, response delivery).
//! - [`Session::read_segments`] moves bytes *to* the network (SYN_STREAM and
//!   DATA frames pulled from transactions, queued control frames).
//!
//! `io::ErrorKind::WouldBlock` from the supplied reader or writer is the
//! suspend signal; the session never blocks.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::compress::{HeaderCompressor, HeaderDecompressor};
use crate::config::SessionConfig;
use crate::error::{CloseReason, SessionError, StreamError};
use crate::frame::{
    create_goaway, create_ping, create_rst_stream, create_settings, create_window_update, flags,
    read_u32, settings_id, ControlType, FrameHeader, RstCode, FRAME_HEADER_LEN, MAX_STREAM_ID,
    SPDY_VERSION,
};
use crate::output::{IoStatus, OutputQueue};
use crate::stream::{queue_for_write, SendContext, Stream, StreamHandle, StreamId, UpstreamState};
use crate::transaction::{ResponseFlow, Transaction, TransportStatus};

/// Largest slice of a DATA frame read from the transport in one step.
const READ_CHUNK: usize = 16 * 1024;

/// Largest slice of an unwanted DATA frame skipped in one step.
const DISCARD_CHUNK: usize = 4096;

/// Read-path (downstream) parser states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DownstreamState {
    BufferingFrameHeader,
    BufferingControlFrame,
    ProcessingDataFrame,
    DiscardingDataFrame,
    /// Flattened response headers are being handed to the transaction.
    ProcessingCompleteHeaders,
}

/// Result of handing response bytes to the stream owning the current frame.
enum Delivery {
    Bytes(usize, ResponseFlow),
    WouldBlock,
    /// The final frame has been fully delivered; the stream can be cleaned up.
    Finished,
}

/// Turns a byte slice into a reader that would-blocks once drained.
struct SliceReader<'a> {
    data: &'a [u8],
}

impl Read for SliceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.is_empty() && !buf.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        self.data.read(buf)
    }
}

/// A client-side SPDY/3 session over one transport connection.
pub struct Session<T: Transaction> {
    config: SessionConfig,

    streams: HashMap<StreamHandle, Stream<T>>,
    streams_by_id: HashMap<u32, StreamHandle>,
    next_handle: u64,
    next_stream_id: u32,

    ready_for_write: VecDeque<StreamHandle>,
    queued_for_activation: VecDeque<StreamHandle>,

    concurrent: u32,
    concurrent_high_water: u32,
    max_concurrent: u32,

    should_go_away: bool,
    go_away_id: u32,
    clean_shutdown: bool,
    closed: bool,

    server_initial_window: i64,

    compressor: HeaderCompressor,
    decompressor: HeaderDecompressor,
    output: OutputQueue,

    downstream_state: DownstreamState,
    frame_header: [u8; FRAME_HEADER_LEN],
    frame_header_used: usize,
    frame_payload: Vec<u8>,
    frame_control_type: Option<ControlType>,
    input_frame_data_size: usize,
    input_frame_data_read: usize,
    input_frame_data_last: bool,
    input_frame_data_stream: Option<StreamHandle>,
    data_pending: bool,
    read_buf: Vec<u8>,

    flat_response_headers: Vec<u8>,
    flat_response_headers_out: usize,

    last_read: Instant,
    last_data_read: Instant,
    ping_sent: Option<Instant>,
    next_ping_id: u32,

    pushes_refused: u32,
}

impl<T: Transaction> Default for Session<T> {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl<T: Transaction> Session<T> {
    /// Create a session. The initial SETTINGS frame is queued immediately and
    /// goes out with the first [`read_segments`](Self::read_segments) call.
    pub fn new(config: SessionConfig) -> Self {
        let now = Instant::now();
        let mut output = OutputQueue::new(config.output_queue_size);
        output.push(&create_settings(&[(
            0,
            settings_id::INITIAL_WINDOW,
            config.initial_window,
        )]));
        debug!(initial_window = config.initial_window, "session created");

        Self {
            streams: HashMap::new(),
            streams_by_id: HashMap::new(),
            next_handle: 1,
            next_stream_id: 1,
            ready_for_write: VecDeque::new(),
            queued_for_activation: VecDeque::new(),
            concurrent: 0,
            concurrent_high_water: 0,
            max_concurrent: config.max_concurrent,
            should_go_away: false,
            go_away_id: 0,
            clean_shutdown: false,
            closed: false,
            server_initial_window: i64::from(config.server_initial_window),
            compressor: HeaderCompressor::new(),
            decompressor: HeaderDecompressor::new(),
            output,
            downstream_state: DownstreamState::BufferingFrameHeader,
            frame_header: [0; FRAME_HEADER_LEN],
            frame_header_used: 0,
            frame_payload: Vec::new(),
            frame_control_type: None,
            input_frame_data_size: 0,
            input_frame_data_read: 0,
            input_frame_data_last: false,
            input_frame_data_stream: None,
            data_pending: false,
            read_buf: Vec::new(),
            flat_response_headers: Vec::new(),
            flat_response_headers_out: 0,
            last_read: now,
            last_data_read: now,
            ping_sent: None,
            next_ping_id: 1,
            pushes_refused: 0,
            config,
        }
    }

    /// The configuration the session was created with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ========================================================================
    // Admission
    // ========================================================================

    /// Attach a transaction. It is activated at once if the concurrency limit
    /// allows, otherwise queued until a stream finishes.
    pub fn add_stream(&mut self, transaction: T, priority: i32) -> Result<StreamHandle, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let handle = StreamHandle(self.next_handle);
        self.next_handle += 1;

        let stream = Stream::new(
            handle,
            transaction,
            priority,
            self.config.sending_chunk_size,
            self.config.coalesce_small_frames,
            self.server_initial_window,
            i64::from(self.config.initial_window),
        );
        self.streams.insert(handle, stream);

        if self.room_for_more_concurrent() {
            debug!(stream = %handle, next_stream_id = self.next_stream_id, "stream activated immediately");
            self.activate_stream(handle);
        } else {
            debug!(stream = %handle, concurrent = self.concurrent, "stream queued");
            self.queued_for_activation.push_back(handle);
        }
        Ok(handle)
    }

    fn room_for_more_concurrent(&self) -> bool {
        self.concurrent < self.max_concurrent
    }

    /// Whether new transactions should still be dispatched to this session.
    pub fn room_for_more_streams(&self) -> bool {
        let projected = u64::from(self.next_stream_id) + self.streams.len() as u64 * 2;
        if projected > u64::from(MAX_STREAM_ID) {
            return false;
        }
        !self.should_go_away
    }

    fn activate_stream(&mut self, handle: StreamHandle) {
        let Some(stream) = self.streams.get_mut(&handle) else {
            return;
        };
        stream.activated = true;
        self.concurrent += 1;
        if self.concurrent > self.concurrent_high_water {
            self.concurrent_high_water = self.concurrent;
        }
        trace!(
            stream = %handle,
            concurrent = self.concurrent,
            high_water = self.concurrent_high_water,
            "stream activated"
        );
        queue_for_write(&mut self.ready_for_write, handle);
    }

    fn process_pending(&mut self) {
        while self.room_for_more_concurrent() {
            let Some(handle) = self.queued_for_activation.pop_front() else {
                return;
            };
            debug!(stream = %handle, "stream activated from queue");
            self.activate_stream(handle);
        }
    }

    /// Signal that a transaction blocked on request bytes has more to send.
    pub fn transaction_has_data_to_write(&mut self, handle: StreamHandle) {
        match self.streams.get(&handle) {
            Some(stream) if stream.activated => {
                trace!(stream = %handle, "transaction has data to write");
                queue_for_write(&mut self.ready_for_write, handle);
            }
            Some(_) => trace!(stream = %handle, "data signal for a queued stream"),
            None => debug!(stream = %handle, "data signal for unknown stream"),
        }
    }

    /// Cancel a transaction. Its stream is reset with CANCEL if the server
    /// has not finished it.
    pub fn close_transaction(&mut self, handle: StreamHandle, reason: CloseReason) {
        if !self.streams.contains_key(&handle) {
            debug!(stream = %handle, "close for unknown transaction");
            return;
        }
        debug!(stream = %handle, %reason, "closing transaction");
        self.cleanup_stream(handle, reason, RstCode::Cancel);
    }

    /// Stop accepting work and close once the last stream is gone.
    pub fn dont_reuse(&mut self) {
        self.should_go_away = true;
        if self.streams.is_empty() {
            self.close(CloseReason::Complete);
        }
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Whether the session has bytes to put on the wire.
    pub fn wants_write(&self) -> bool {
        !self.ready_for_write.is_empty() || !self.output.is_empty()
    }

    /// One step of the write path: let the next ready stream produce frames,
    /// then flush queued control frames.
    pub fn read_segments<W: Write>(
        &mut self,
        writer: &mut W,
        count: usize,
    ) -> Result<IoStatus, SessionError> {
        if self.closed {
            return self.flush_after_close(writer);
        }

        let Some(handle) = self.ready_for_write.pop_front() else {
            trace!("no stream to write; suspending");
            self.flush_output(writer)?;
            return Ok(IoStatus::WouldBlock);
        };

        let Some(stream) = self.streams.get_mut(&handle) else {
            return Ok(IoStatus::Transferred(0));
        };
        trace!(
            stream = %handle,
            stream_id = ?stream.id.get(),
            blocked_on_read = stream.request_blocked_on_read,
            blocked_on_rwin = stream.blocked_on_rwin,
            "writing from stream"
        );

        let result = {
            let mut cx = SendContext {
                writer: &mut *writer,
                output: &mut self.output,
                compressor: &mut self.compressor,
                next_stream_id: &mut self.next_stream_id,
                streams_by_id: &mut self.streams_by_id,
                ready_for_write: &mut self.ready_for_write,
                should_go_away: &mut self.should_go_away,
            };
            stream.read_segments(&mut cx, count)
        };
        let blocked_on_read = stream.request_blocked_on_read;
        let blocked_on_rwin = stream.blocked_on_rwin;

        // Not every step produces bytes, but older output may be waiting.
        self.flush_output(writer)?;

        let status = match result {
            Ok(status) => status,
            Err(StreamError::Transport(e)) => {
                warn!(stream = %handle, error = %e, "transport write failed");
                self.close(CloseReason::Aborted);
                return Err(SessionError::Io(e));
            }
            Err(e) => {
                warn!(stream = %handle, error = %e, "stream failed while sending");
                self.cleanup_stream(handle, e.close_reason(), RstCode::Cancel);
                return Ok(IoStatus::Transferred(0));
            }
        };

        if blocked_on_read {
            trace!(stream = %handle, "stream blocked on request bytes");
            if self.ready_for_write.is_empty() {
                return Ok(IoStatus::WouldBlock);
            }
            return Ok(IoStatus::Transferred(0));
        }

        match status {
            IoStatus::Transferred(n) if n > 0 => {
                queue_for_write(&mut self.ready_for_write, handle);
                Ok(status)
            }
            IoStatus::WouldBlock => Ok(IoStatus::WouldBlock),
            IoStatus::Transferred(_) if blocked_on_rwin => {
                debug!(stream = %handle, "stream suspended for flow control");
                Ok(IoStatus::WouldBlock)
            }
            IoStatus::Transferred(_) => {
                trace!(stream = %handle, "stream send complete");
                Ok(status)
            }
        }
    }

    /// Drive the write path until no stream is ready or the transport stops
    /// accepting bytes. Returns the request bytes taken from transactions.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> Result<usize, SessionError> {
        let mut total = 0;
        loop {
            if self.closed || self.ready_for_write.is_empty() {
                match self.read_segments(writer, self.config.output_queue_size) {
                    Ok(_) | Err(SessionError::Closed) => return Ok(total),
                    Err(e) => return Err(e),
                }
            }

            match self.read_segments(writer, self.config.output_queue_size)? {
                IoStatus::Transferred(n) => total += n,
                IoStatus::WouldBlock => {
                    if self.ready_for_write.is_empty() || !self.output.is_empty() {
                        return Ok(total);
                    }
                }
            }
        }
    }

    fn flush_output<W: Write>(&mut self, writer: &mut W) -> Result<(), SessionError> {
        if let Err(e) = self.output.flush(writer) {
            warn!(error = %e, "transport write failed");
            self.close(CloseReason::Aborted);
            return Err(SessionError::Io(e));
        }
        Ok(())
    }

    /// A closed session still owes the transport whatever is queued, such as
    /// its final GOAWAY.
    fn flush_after_close<W: Write>(&mut self, writer: &mut W) -> Result<IoStatus, SessionError> {
        let before = self.output.pending();
        if before == 0 {
            return Err(SessionError::Closed);
        }
        self.output.flush(writer)?;
        match before - self.output.pending() {
            0 => Ok(IoStatus::WouldBlock),
            n => Ok(IoStatus::Transferred(n)),
        }
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// One step of the read path. Callers loop until `WouldBlock`.
    ///
    /// A fatal error closes the session (without GOAWAY) before it is
    /// returned.
    pub fn write_segments<R: Read>(
        &mut self,
        reader: &mut R,
        count: usize,
    ) -> Result<IoStatus, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        match self.advance_downstream(reader, count.max(1)) {
            Err(e) if e.is_fatal() => {
                warn!(error = %e, "fatal session error");
                self.close(e.close_reason());
                Err(e)
            }
            result => result,
        }
    }

    /// Feed `data` through the read path. Returns how many bytes were used,
    /// which is all of them unless the session closed part way.
    pub fn process(&mut self, data: &[u8]) -> Result<usize, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }

        let mut reader = SliceReader { data };
        while !self.closed {
            if self.write_segments(&mut reader, usize::MAX)? == IoStatus::WouldBlock {
                break;
            }
        }
        Ok(data.len() - reader.data.len())
    }

    fn advance_downstream<R: Read>(
        &mut self,
        reader: &mut R,
        count: usize,
    ) -> Result<IoStatus, SessionError> {
        match self.downstream_state {
            DownstreamState::BufferingFrameHeader => self.buffer_frame_header(reader),
            DownstreamState::BufferingControlFrame => self.buffer_control_frame(reader),
            DownstreamState::ProcessingDataFrame | DownstreamState::ProcessingCompleteHeaders => {
                self.deliver_to_stream(reader, count)
            }
            DownstreamState::DiscardingDataFrame => self.discard_data_frame(reader),
        }
    }

    /// Read from the transport, noting the time of any fresh bytes.
    fn network_read<R: Read>(&mut self, reader: &mut R, len: usize) -> Result<Option<usize>, SessionError> {
        self.read_buf.resize(len, 0);
        let n = loop {
            match reader.read(&mut self.read_buf[..len]) {
                Ok(0) if len > 0 => return Err(SessionError::TransportClosed),
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        };
        if n > 0 {
            self.last_read = Instant::now();
        }
        Ok(Some(n))
    }

    fn buffer_frame_header<R: Read>(&mut self, reader: &mut R) -> Result<IoStatus, SessionError> {
        let used = self.frame_header_used;
        let Some(n) = self.network_read(reader, FRAME_HEADER_LEN - used)? else {
            return Ok(IoStatus::WouldBlock);
        };
        self.frame_header[used..used + n].copy_from_slice(&self.read_buf[..n]);
        self.frame_header_used += n;

        if self.frame_header_used < FRAME_HEADER_LEN {
            trace!(used = self.frame_header_used, "frame header incomplete");
            return Ok(IoStatus::Transferred(n));
        }

        let header = FrameHeader::parse(&self.frame_header)
            .ok_or(SessionError::Framing("truncated frame header"))?;
        self.input_frame_data_size = header.length() as usize;
        self.input_frame_data_read = 0;

        match header {
            FrameHeader::Control {
                version,
                control_type,
                length,
                ..
            } => {
                debug!(control_type, version, len = length, "control frame identified");
                let control_type = ControlType::from_u16(control_type)
                    .ok_or(SessionError::UnknownControlType(control_type))?;
                if version != SPDY_VERSION {
                    return Err(SessionError::UnsupportedVersion(version));
                }

                self.frame_control_type = Some(control_type);
                self.frame_payload.clear();
                self.frame_payload.resize(self.input_frame_data_size, 0);
                self.downstream_state = DownstreamState::BufferingControlFrame;
            }
            FrameHeader::Data {
                stream_id,
                flags: frame_flags,
                ..
            } => self.start_data_frame(stream_id, frame_flags),
        }
        Ok(IoStatus::Transferred(n))
    }

    fn start_data_frame(&mut self, stream_id: u32, frame_flags: u8) {
        self.downstream_state = DownstreamState::ProcessingDataFrame;
        self.last_data_read = self.last_read;
        self.input_frame_data_last = frame_flags & flags::FIN != 0;

        let handle = self.streams_by_id.get(&stream_id).copied();
        self.input_frame_data_stream = handle;

        match handle.and_then(|h| self.streams.get_mut(&h).map(|s| (h, s))) {
            None => {
                debug!(
                    stream_id,
                    next_stream_id = self.next_stream_id,
                    "DATA for unknown stream"
                );
                if stream_id >= self.next_stream_id {
                    self.generate_rst(stream_id, RstCode::InvalidStream);
                }
                self.input_frame_data_stream = None;
                self.downstream_state = DownstreamState::DiscardingDataFrame;
            }
            Some((_, stream)) if stream.recvd_fin => {
                debug!(stream_id, "DATA for a stream the server already closed");
                self.generate_rst(stream_id, RstCode::StreamAlreadyClosed);
                self.downstream_state = DownstreamState::DiscardingDataFrame;
            }
            Some((handle, stream)) if !stream.recvd_data => {
                stream.recvd_data = true;
                debug!(stream_id, "first DATA frame flushes response headers");
                if let Err(e) = self.response_headers_complete(handle) {
                    debug!(stream_id, error = %e, "response headers rejected");
                    self.cleanup_stream(handle, CloseReason::IllegalValue, RstCode::ProtocolError);
                    self.downstream_state = DownstreamState::DiscardingDataFrame;
                } else {
                    self.data_pending = true;
                }
            }
            Some(_) => {}
        }

        trace!(
            stream_id,
            fin = self.input_frame_data_last,
            len = self.input_frame_data_size,
            "start processing DATA frame"
        );
        self.update_local_rwin(self.input_frame_data_stream, self.input_frame_data_size as u64);
    }

    fn buffer_control_frame<R: Read>(&mut self, reader: &mut R) -> Result<IoStatus, SessionError> {
        let mut n = 0;
        let remaining = self.input_frame_data_size - self.input_frame_data_read;
        if remaining > 0 {
            n = match self.network_read(reader, remaining)? {
                Some(n) => n,
                None => return Ok(IoStatus::WouldBlock),
            };
            let start = self.input_frame_data_read;
            self.frame_payload[start..start + n].copy_from_slice(&self.read_buf[..n]);
            self.input_frame_data_read += n;

            if self.input_frame_data_read < self.input_frame_data_size {
                return Ok(IoStatus::Transferred(n));
            }
        }

        let control_type = self
            .frame_control_type
            .take()
            .ok_or(SessionError::Framing("control frame without a type"))?;
        let frame_flags = self.frame_header[4];
        log_io("control frame", &self.frame_payload);

        let payload = std::mem::take(&mut self.frame_payload);
        let result = self.dispatch_control_frame(control_type, frame_flags, &payload);
        self.frame_payload = payload;
        result?;

        if self.should_go_away && self.streams.is_empty() {
            self.close(CloseReason::Complete);
        }
        Ok(IoStatus::Transferred(n))
    }

    fn dispatch_control_frame(
        &mut self,
        control_type: ControlType,
        frame_flags: u8,
        payload: &[u8],
    ) -> Result<(), SessionError> {
        debug!(frame_type = ?control_type, flags = frame_flags, len = payload.len(), "control frame");
        match control_type {
            ControlType::SynStream => self.handle_syn_stream(payload),
            ControlType::SynReply => self.handle_reply_headers(payload, frame_flags, true),
            ControlType::RstStream => self.handle_rst_stream(payload, frame_flags),
            ControlType::Settings => self.handle_settings(payload),
            ControlType::Noop => {
                trace!("NOOP");
                self.reset_downstream_state();
                Ok(())
            }
            ControlType::Ping => self.handle_ping(payload),
            ControlType::GoAway => self.handle_goaway(payload),
            ControlType::Headers => self.handle_reply_headers(payload, frame_flags, false),
            ControlType::WindowUpdate => self.handle_window_update(payload),
        }
    }

    fn handle_syn_stream(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() < 10 {
            return Err(SessionError::Framing("SYN_STREAM too short"));
        }

        let stream_id = read_u32(payload, 0) & 0x7fff_ffff;
        let associated_id = read_u32(payload, 4) & 0x7fff_ffff;
        debug!(stream_id, associated_id, "server push");

        if stream_id & 1 == 1 {
            return Err(SessionError::InvalidPushStream(stream_id));
        }

        self.pushes_refused += 1;
        if stream_id >= MAX_STREAM_ID {
            self.should_go_away = true;
        }

        // The block is unwanted but the inflate context must still see it.
        self.decompressor.discard(&payload[10..])?;
        self.generate_rst(stream_id, RstCode::RefusedStream);
        self.reset_downstream_state();
        Ok(())
    }

    /// SYN_REPLY and HEADERS: collect the header block on the stream and
    /// flatten it once the FIN flag says no more blocks follow.
    fn handle_reply_headers(
        &mut self,
        payload: &[u8],
        frame_flags: u8,
        syn_reply: bool,
    ) -> Result<(), SessionError> {
        if payload.len() < 4 {
            return Err(SessionError::Framing("header frame too short"));
        }

        let stream_id = read_u32(payload, 0) & 0x7fff_ffff;
        let block = &payload[4..];

        let Some(handle) = self.streams_by_id.get(&stream_id).copied() else {
            debug!(
                stream_id,
                next_stream_id = self.next_stream_id,
                "header frame for unknown stream"
            );
            if stream_id >= self.next_stream_id {
                self.generate_rst(stream_id, RstCode::InvalidStream);
            }
            self.decompressor.discard(block)?;
            self.reset_downstream_state();
            return Ok(());
        };
        let Some(stream) = self.streams.get_mut(&handle) else {
            return Err(SessionError::Framing("stream tables out of step"));
        };
        self.input_frame_data_stream = Some(handle);

        // Inflate before any stream-level rejection so the shared context
        // stays in step.
        stream.uncompress(&mut self.decompressor, block)?;

        if syn_reply {
            if stream.fully_open {
                let recvd_fin = stream.recvd_fin;
                debug!(stream_id, recvd_fin, "duplicate SYN_REPLY");
                if recvd_fin {
                    // cleanup only resets streams the server has not finished
                    self.generate_rst(stream_id, RstCode::StreamAlreadyClosed);
                }
                self.cleanup_stream(handle, CloseReason::AlreadyOpened, RstCode::StreamInUse);
                self.reset_downstream_state();
                return Ok(());
            }
            stream.fully_open = true;
        }

        self.input_frame_data_last = frame_flags & flags::FIN != 0;
        stream.update_transport_read_events(payload.len() as u64);
        self.last_data_read = self.last_read;

        if frame_flags & !flags::FIN != 0 {
            debug!(stream_id, flags = frame_flags, "undefined flag on header frame");
            self.cleanup_stream(handle, CloseReason::IllegalValue, RstCode::ProtocolError);
            self.reset_downstream_state();
            return Ok(());
        }

        if !self.input_frame_data_last {
            // more HEADERS may follow
            self.reset_downstream_state();
            return Ok(());
        }

        if let Err(e) = self.response_headers_complete(handle) {
            debug!(stream_id, error = %e, "response headers rejected");
            self.cleanup_stream(handle, CloseReason::IllegalValue, RstCode::ProtocolError);
            self.reset_downstream_state();
        }
        Ok(())
    }

    fn response_headers_complete(&mut self, handle: StreamHandle) -> Result<(), StreamError> {
        let stream = self
            .streams
            .get_mut(&handle)
            .ok_or(StreamError::UnexpectedState("headers for a removed stream"))?;
        trace!(
            stream = %handle,
            fin = self.input_frame_data_last,
            "response headers complete"
        );

        self.flat_response_headers = stream.convert_headers()?;
        self.flat_response_headers_out = 0;
        self.downstream_state = DownstreamState::ProcessingCompleteHeaders;
        Ok(())
    }

    fn handle_rst_stream(&mut self, payload: &[u8], frame_flags: u8) -> Result<(), SessionError> {
        if payload.len() != 8 {
            return Err(SessionError::Framing("RST_STREAM wrong length"));
        }
        if frame_flags != 0 {
            return Err(SessionError::Framing("RST_STREAM with flags"));
        }

        let stream_id = read_u32(payload, 0) & 0x7fff_ffff;
        let code = read_u32(payload, 4);
        let reason = RstCode::from_u32(code);
        debug!(stream_id, code, "RST_STREAM received");
        self.reset_downstream_state();

        if matches!(
            reason,
            Some(RstCode::InvalidStream | RstCode::StreamInUse | RstCode::FlowControlError)
        ) {
            trace!(stream_id, code, "no reset processing needed");
            return Ok(());
        }

        let Some(handle) = self.streams_by_id.get(&stream_id).copied() else {
            debug!(stream_id, code, "RST_STREAM for unknown stream ignored");
            return Ok(());
        };

        let result = match reason {
            Some(RstCode::RefusedStream) => CloseReason::Reset,
            Some(
                RstCode::Cancel
                | RstCode::ProtocolError
                | RstCode::InternalError
                | RstCode::UnsupportedVersion,
            ) => CloseReason::Interrupted,
            Some(RstCode::FrameTooLarge) => CloseReason::FrameTooLarge,
            _ => CloseReason::IllegalValue,
        };
        if !matches!(reason, Some(RstCode::RefusedStream | RstCode::Cancel)) {
            self.should_go_away = true;
        }

        self.cleanup_stream(handle, result, RstCode::Cancel);
        Ok(())
    }

    fn handle_settings(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() < 4 {
            return Err(SessionError::Framing("SETTINGS too short"));
        }

        let entries = read_u32(payload, 0) as usize;
        if (payload.len() - 4) / 8 < entries {
            return Err(SessionError::Framing("SETTINGS shorter than its entry count"));
        }
        debug!(entries, "SETTINGS received");

        let mut concurrency_changed = false;
        for index in 0..entries {
            let offset = 4 + index * 8;
            let entry_flags = payload[offset];
            let id = read_u32(payload, offset) & 0x00ff_ffff;
            let value = read_u32(payload, offset + 4);
            trace!(id, flags = entry_flags, value, "setting");

            match id {
                settings_id::MAX_CONCURRENT => {
                    self.max_concurrent = value;
                    concurrency_changed = true;
                }
                settings_id::INITIAL_WINDOW => {
                    let delta = i64::from(value) - self.server_initial_window;
                    self.server_initial_window = i64::from(value);

                    // The delta applies to every stream, and may be negative.
                    for (&handle, stream) in self.streams.iter_mut() {
                        let old = stream.remote_window;
                        stream.update_remote_window(delta);
                        if stream.activated && old <= 0 && stream.remote_window > 0 {
                            queue_for_write(&mut self.ready_for_write, handle);
                        }
                    }
                }
                _ => {}
            }
        }

        if concurrency_changed {
            self.process_pending();
        }
        self.reset_downstream_state();
        Ok(())
    }

    fn handle_ping(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() != 4 {
            return Err(SessionError::Framing("PING wrong length"));
        }

        let ping_id = read_u32(payload, 0);
        debug!(ping_id, "PING received");
        if ping_id & 1 == 1 {
            // reply to our keep-alive
            self.ping_sent = None;
        } else {
            self.output.push(&create_ping(ping_id));
        }
        self.reset_downstream_state();
        Ok(())
    }

    fn handle_goaway(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        // A trailing status word is tolerated.
        if payload.len() != 4 && payload.len() != 8 {
            return Err(SessionError::Framing("GOAWAY wrong length"));
        }

        self.should_go_away = true;
        self.clean_shutdown = true;
        self.go_away_id = read_u32(payload, 0) & 0x7fff_ffff;
        debug!(last_good_id = self.go_away_id, "GOAWAY received");
        self.reset_downstream_state();
        Ok(())
    }

    fn handle_window_update(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() < 8 {
            return Err(SessionError::Framing("WINDOW_UPDATE too short"));
        }

        let stream_id = read_u32(payload, 0) & 0x7fff_ffff;
        let delta = read_u32(payload, 4) & 0x7fff_ffff;
        trace!(stream_id, delta, "WINDOW_UPDATE received");

        let Some(handle) = self.streams_by_id.get(&stream_id).copied() else {
            debug!(stream_id, "WINDOW_UPDATE for unknown stream");
            if stream_id >= self.next_stream_id {
                self.generate_rst(stream_id, RstCode::InvalidStream);
            }
            self.reset_downstream_state();
            return Ok(());
        };

        if let Some(stream) = self.streams.get_mut(&handle) {
            let old = stream.remote_window;
            stream.update_remote_window(i64::from(delta));
            debug!(
                stream_id,
                old_window = old,
                new_window = stream.remote_window,
                "remote window updated"
            );
            if old <= 0 && stream.remote_window > 0 {
                queue_for_write(&mut self.ready_for_write, handle);
            }
        }
        self.reset_downstream_state();
        Ok(())
    }

    fn deliver_to_stream<R: Read>(&mut self, reader: &mut R, count: usize) -> Result<IoStatus, SessionError> {
        let Some(handle) = self.input_frame_data_stream else {
            self.downstream_state = DownstreamState::DiscardingDataFrame;
            return Ok(IoStatus::Transferred(0));
        };
        let delivery = self.on_write_segment(reader, handle, count)?;
        self.last_data_read = self.last_read;

        match delivery {
            Delivery::WouldBlock => Ok(IoStatus::WouldBlock),
            Delivery::Finished => {
                trace!(stream = %handle, "response complete");
                self.cleanup_stream(handle, CloseReason::Complete, RstCode::Cancel);
                Ok(IoStatus::Transferred(0))
            }
            Delivery::Bytes(n, ResponseFlow::Continue) => Ok(IoStatus::Transferred(n)),
            Delivery::Bytes(n, ResponseFlow::Done) => {
                debug!(stream = %handle, "transaction finished before the stream");
                if self.input_frame_data_stream == Some(handle) {
                    self.downstream_state = DownstreamState::ProcessingDataFrame;
                    if self.input_frame_data_read == self.input_frame_data_size {
                        self.reset_downstream_state();
                    }
                }
                self.cleanup_stream(handle, CloseReason::Complete, RstCode::Cancel);
                Ok(IoStatus::Transferred(n))
            }
        }
    }

    /// Hand the next piece of the current frame (or of the flattened response
    /// headers) to its stream.
    fn on_write_segment<R: Read>(
        &mut self,
        reader: &mut R,
        handle: StreamHandle,
        count: usize,
    ) -> Result<Delivery, SessionError> {
        if self.downstream_state == DownstreamState::ProcessingCompleteHeaders {
            let total = self.flat_response_headers.len();
            if self.flat_response_headers_out == total && self.input_frame_data_last {
                self.reset_downstream_state();
                return Ok(Delivery::Finished);
            }

            let start = self.flat_response_headers_out;
            let n = count.min(total - start);
            let Some(stream) = self.streams.get_mut(&handle) else {
                return Err(SessionError::Framing("stream tables out of step"));
            };
            let flow = stream.write_response(&self.flat_response_headers[start..start + n]);
            self.flat_response_headers_out += n;

            if self.flat_response_headers_out == total {
                if self.data_pending {
                    // the DATA frame that triggered conversion is still unread
                    self.data_pending = false;
                    self.downstream_state = DownstreamState::ProcessingDataFrame;
                } else if !self.input_frame_data_last {
                    self.reset_downstream_state();
                }
            }
            return Ok(Delivery::Bytes(n, flow));
        }

        if self.input_frame_data_last && self.input_frame_data_read == self.input_frame_data_size {
            self.reset_downstream_state();
            return Ok(Delivery::Finished);
        }

        let want = count
            .min(READ_CHUNK)
            .min(self.input_frame_data_size - self.input_frame_data_read);
        let Some(n) = self.network_read(reader, want)? else {
            return Ok(Delivery::WouldBlock);
        };
        log_io("data frame", &self.read_buf[..n]);
        self.input_frame_data_read += n;

        let Some(stream) = self.streams.get_mut(&handle) else {
            return Err(SessionError::Framing("stream tables out of step"));
        };
        stream.update_transport_read_events(n as u64);
        let flow = if n > 0 {
            stream.write_response(&self.read_buf[..n])
        } else {
            ResponseFlow::Continue
        };

        if self.input_frame_data_read == self.input_frame_data_size && !self.input_frame_data_last {
            self.reset_downstream_state();
        }
        Ok(Delivery::Bytes(n, flow))
    }

    fn discard_data_frame<R: Read>(&mut self, reader: &mut R) -> Result<IoStatus, SessionError> {
        let remaining = self.input_frame_data_size - self.input_frame_data_read;
        if remaining == 0 {
            self.reset_downstream_state();
            return Ok(IoStatus::Transferred(0));
        }

        let Some(n) = self.network_read(reader, remaining.min(DISCARD_CHUNK))? else {
            return Ok(IoStatus::WouldBlock);
        };
        trace!(n, remaining, "discarding frame bytes");
        self.input_frame_data_read += n;
        if self.input_frame_data_read == self.input_frame_data_size {
            self.reset_downstream_state();
        }
        Ok(IoStatus::Transferred(n))
    }

    fn reset_downstream_state(&mut self) {
        self.downstream_state = DownstreamState::BufferingFrameHeader;

        if self.input_frame_data_last {
            let finished = self
                .input_frame_data_stream
                .and_then(|handle| self.streams.get_mut(&handle))
                .filter(|stream| !stream.recvd_fin);
            if let Some(stream) = finished {
                stream.recvd_fin = true;
                if stream.activated {
                    self.concurrent = self.concurrent.saturating_sub(1);
                }
                self.process_pending();
            }
        }

        self.input_frame_data_last = false;
        self.frame_header_used = 0;
        self.input_frame_data_stream = None;
    }

    /// Account for received DATA and acknowledge it once enough has piled up.
    fn update_local_rwin(&mut self, handle: Option<StreamHandle>, bytes: u64) {
        let Some(stream) = handle.and_then(|h| self.streams.get_mut(&h)) else {
            return;
        };
        if stream.recvd_fin {
            return;
        }

        stream.decrement_local_window(bytes);
        if stream.local_unacked < self.config.minimum_to_ack {
            return;
        }

        let to_ack = (stream.local_unacked & 0x7fff_ffff) as u32;
        stream.increment_local_window(u64::from(to_ack));
        if let Some(stream_id) = stream.id.get() {
            trace!(stream_id, to_ack, "acknowledging received data");
            self.output.push(&create_window_update(stream_id, to_ack));
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    fn generate_rst(&mut self, stream_id: u32, code: RstCode) {
        debug!(stream_id, code = ?code, "generating RST_STREAM");
        self.output.push(&create_rst_stream(stream_id, code));
    }

    fn cleanup_stream(&mut self, handle: StreamHandle, reason: CloseReason, code: RstCode) {
        let Some(stream) = self.streams.get(&handle) else {
            return;
        };
        let (recvd_fin, activated, stream_id) = (stream.recvd_fin, stream.activated, stream.id.get());
        debug!(stream = %handle, stream_id = ?stream_id, %reason, "cleaning up stream");

        if !recvd_fin {
            if let Some(stream_id) = stream_id {
                self.generate_rst(stream_id, code);
            }
            if activated {
                self.concurrent = self.concurrent.saturating_sub(1);
            }
        }

        self.close_stream(handle, reason);

        if !recvd_fin && activated {
            self.process_pending();
        }
        if self.should_go_away && self.streams.is_empty() {
            self.close(CloseReason::Complete);
        }
    }

    fn close_stream(&mut self, handle: StreamHandle, reason: CloseReason) {
        if self.input_frame_data_stream == Some(handle) {
            trace!(stream = %handle, "stream closed with a partially read frame");
            self.downstream_state = DownstreamState::DiscardingDataFrame;
            self.input_frame_data_stream = None;
            self.data_pending = false;
        }

        self.ready_for_write.retain(|&h| h != handle);
        self.queued_for_activation.retain(|&h| h != handle);

        if let Some(mut stream) = self.streams.remove(&handle) {
            if let Some(stream_id) = stream.id.get() {
                self.streams_by_id.remove(&stream_id);
            }
            stream.close(reason);
        }
    }

    /// Tear the session down. Every live stream is closed: as retryable if the
    /// server's GOAWAY covered it, otherwise as aborted. A successful close
    /// queues a GOAWAY. Further calls do nothing.
    pub fn close(&mut self, reason: CloseReason) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!(
            %reason,
            streams = self.streams.len(),
            go_away_id = self.go_away_id,
            clean_shutdown = self.clean_shutdown,
            "closing session"
        );

        let fallback = if reason == CloseReason::TimedOut {
            CloseReason::TimedOut
        } else {
            CloseReason::Aborted
        };

        let mut handles: Vec<StreamHandle> = self.streams.keys().copied().collect();
        handles.sort_unstable();
        for handle in handles {
            let Some(mut stream) = self.streams.remove(&handle) else {
                continue;
            };
            let retryable = self.clean_shutdown
                && match stream.id {
                    StreamId::Pending => true,
                    StreamId::Assigned(id) => id <= self.go_away_id,
                };
            stream.close(if retryable { CloseReason::Reset } else { fallback });
        }

        self.streams_by_id.clear();
        self.ready_for_write.clear();
        self.queued_for_activation.clear();
        self.input_frame_data_stream = None;
        self.data_pending = false;
        self.concurrent = 0;

        if reason.is_success() {
            self.output.push(&create_goaway(0));
        }
    }

    // ========================================================================
    // Keep-alive
    // ========================================================================

    /// Periodic tick. Sends a PING after `ping_threshold` of read silence and
    /// closes the session if it goes unanswered for `ping_timeout`.
    pub fn read_timeout_tick(&mut self, now: Instant) {
        if self.closed || self.config.ping_threshold.is_zero() {
            return;
        }

        let idle = now.saturating_duration_since(self.last_read);
        trace!(idle_secs = idle.as_secs(), "read timeout tick");

        if idle < self.config.ping_threshold {
            // recent activity
            self.ping_sent = None;
            return;
        }

        if let Some(sent) = self.ping_sent {
            if now.saturating_duration_since(sent) >= self.config.ping_timeout {
                warn!("keep-alive ping timed out");
                self.ping_sent = None;
                self.close(CloseReason::TimedOut);
            }
            return;
        }

        if self.next_ping_id == u32::MAX {
            debug!("cannot send ping: IDs exhausted");
            return;
        }

        debug!(ping_id = self.next_ping_id, "generating keep-alive ping");
        self.ping_sent = Some(now);
        self.output.push(&create_ping(self.next_ping_id));
        self.next_ping_id += 2;

        if self.next_ping_id == u32::MAX {
            debug!("ping IDs exhausted; marking go-away");
            self.should_go_away = true;
        }
    }

    /// Time since response bytes were last delivered to a stream.
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_data_read)
    }

    /// Forward connection-level progress. Only the first stream hears about
    /// host resolution and connection setup.
    pub fn on_transport_status(&mut self, status: TransportStatus, progress: u64) {
        match status {
            TransportStatus::ResolvingHost
            | TransportStatus::ResolvedHost
            | TransportStatus::ConnectingTo
            | TransportStatus::ConnectedTo => {
                if let Some(stream) = self
                    .streams_by_id
                    .get(&1)
                    .and_then(|handle| self.streams.get_mut(handle))
                {
                    stream.on_transport_status(status, progress);
                }
            }
            // regenerated per stream by the streams themselves
            TransportStatus::SendingTo
            | TransportStatus::WaitingFor
            | TransportStatus::ReceivingFrom => {}
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The transaction carried by `handle`, while its stream is live.
    pub fn transaction_mut(&mut self, handle: StreamHandle) -> Option<&mut T> {
        self.streams.get_mut(&handle).map(Stream::transaction_mut)
    }

    /// Send-side state of the stream.
    pub fn stream_state(&self, handle: StreamHandle) -> Option<UpstreamState> {
        self.streams.get(&handle).map(|s| s.upstream_state)
    }

    /// Wire ID of the stream, `Pending` until its SYN_STREAM is built.
    pub fn stream_id(&self, handle: StreamHandle) -> Option<StreamId> {
        self.streams.get(&handle).map(|s| s.id)
    }

    /// Bytes the stream may still send before the server opens its window.
    pub fn remote_window(&self, handle: StreamHandle) -> Option<i64> {
        self.streams.get(&handle).map(|s| s.remote_window)
    }

    /// Bytes the server may still send on the stream before we acknowledge.
    pub fn local_window(&self, handle: StreamHandle) -> Option<i64> {
        self.streams.get(&handle).map(|s| s.local_window)
    }

    /// Whether the stream is waiting for a turn on the write path.
    pub fn is_queued_for_write(&self, handle: StreamHandle) -> bool {
        self.ready_for_write.contains(&handle)
    }

    /// Number of streams waiting for a turn on the write path.
    pub fn write_queue_len(&self) -> usize {
        self.ready_for_write.len()
    }

    /// Whether the stream is held back by the concurrency limit.
    pub fn is_pending_activation(&self, handle: StreamHandle) -> bool {
        self.queued_for_activation.contains(&handle)
    }

    /// Live streams, active or queued.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Whether the session has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Streams currently counted against the concurrency limit.
    pub fn concurrent(&self) -> u32 {
        self.concurrent
    }

    /// Most streams ever active at once.
    pub fn concurrent_high_water(&self) -> u32 {
        self.concurrent_high_water
    }

    /// Concurrency limit, as last announced by the server.
    pub fn max_concurrent(&self) -> u32 {
        self.max_concurrent
    }

    /// Initial send window for new streams, as last announced by the server.
    pub fn server_initial_window(&self) -> i64 {
        self.server_initial_window
    }

    /// Whether the session takes no new streams and closes once drained.
    pub fn should_go_away(&self) -> bool {
        self.should_go_away
    }

    /// Last-good stream ID from the server's GOAWAY, 0 if none arrived.
    pub fn go_away_id(&self) -> u32 {
        self.go_away_id
    }

    /// Server pushes refused so far.
    pub fn pushes_refused(&self) -> u32 {
        self.pushes_refused
    }

    /// ID the next SYN_STREAM will carry.
    pub fn next_stream_id(&self) -> u32 {
        self.next_stream_id
    }
}

/// Hex dump of received bytes at trace level.
fn log_io(label: &str, data: &[u8]) {
    if !tracing::enabled!(tracing::Level::TRACE) {
        return;
    }
    for (line, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02X}")).collect();
        trace!(label, offset = line * 16, "{}", hex.join(" "));
    }
}
