//! The session output queue.
//!
//! Session-generated control frames are appended unconditionally. Stream
//! frames are written straight to the transport when nothing is queued and
//! only buffered whole; a frame that does not fit is refused so the stream can
//! retry once the transport drains.

use std::io::{self, Write};

use tracing::trace;

/// Bytes kept free for session-generated control frames.
const QUEUE_RESERVED: usize = 1024;
/// Sent bytes that must accumulate before the queue is compacted.
const QUEUE_MINIMUM_CLEANUP: usize = 24 * 1024;
/// Compact once less tail room than this remains.
const QUEUE_TAIL_ROOM: usize = 4096;

/// Outcome of offering stream bytes to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStatus {
    Transferred(usize),
    WouldBlock,
}

#[derive(Debug)]
pub(crate) struct OutputQueue {
    buf: Vec<u8>,
    sent: usize,
    size: usize,
}

impl OutputQueue {
    pub fn new(size: usize) -> Self {
        let size = size.max(QUEUE_RESERVED * 2);
        Self {
            buf: Vec::with_capacity(size),
            sent: 0,
            size,
        }
    }

    /// Bytes still waiting for the transport.
    pub fn pending(&self) -> usize {
        self.buf.len() - self.sent
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Queue a session-generated frame. The queue grows if it has to.
    pub fn push(&mut self, frame: &[u8]) {
        self.buf.extend_from_slice(frame);
        if self.buf.len() > self.size {
            self.size = self.buf.len();
        }
    }

    /// Write as much of the queue as the transport accepts.
    pub fn flush<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        let avail = self.pending();
        if avail == 0 {
            return Ok(());
        }

        let written = match write_some(writer, &self.buf[self.sent..])? {
            Some(n) => n,
            None => return Ok(()),
        };
        trace!(written, avail, "output queue flush");

        if written == avail {
            self.buf.clear();
            self.sent = 0;
            return Ok(());
        }

        self.sent += written;
        if self.sent >= QUEUE_MINIMUM_CLEANUP && self.size - self.buf.len() < QUEUE_TAIL_ROOM {
            self.buf.drain(..self.sent);
            self.sent = 0;
        }
        Ok(())
    }

    /// Accept a stream frame in its entirety or refuse it.
    pub fn write_through<W: Write>(&mut self, writer: &mut W, data: &[u8]) -> io::Result<IoStatus> {
        if !self.buf.is_empty() {
            self.flush(writer)?;
        }

        if self.buf.is_empty() {
            let written = write_some(writer, data)?.unwrap_or(0);
            if written < data.len() {
                self.push(&data[written..]);
            }
            return Ok(IoStatus::Transferred(data.len()));
        }

        if self.buf.len() + data.len() > self.size.saturating_sub(QUEUE_RESERVED) {
            return Ok(IoStatus::WouldBlock);
        }

        self.buf.extend_from_slice(data);
        self.flush(writer)?;
        Ok(IoStatus::Transferred(data.len()))
    }

    /// Make sure `count` bytes can be accepted by [`write_through`](Self::write_through).
    /// An empty queue grows to fit; a busy one refuses.
    pub fn commit_to_segment_size<W: Write>(&mut self, writer: &mut W, count: usize) -> io::Result<bool> {
        if !self.buf.is_empty() {
            self.flush(writer)?;
        }

        if self.buf.len() + count <= self.size.saturating_sub(QUEUE_RESERVED) {
            return Ok(true);
        }
        if !self.buf.is_empty() {
            return Ok(false);
        }

        self.size = count + QUEUE_RESERVED;
        self.buf.reserve(self.size);
        Ok(true)
    }
}

/// One write attempt. `None` means the transport would block.
fn write_some<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<Option<usize>> {
    loop {
        match writer.write(data) {
            Ok(n) => return Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}
