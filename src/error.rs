//! Error types for the session, individual streams and header compression.

use std::fmt;
use std::io;

/// Failure of the shared zlib header contexts.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("deflate failed: {0}")]
    Deflate(#[from] flate2::CompressError),

    #[error("inflate failed: {0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("zlib made no progress on a {0}-byte header block")]
    Stalled(usize),
}

/// Session-scoped errors. Everything except [`SessionError::Closed`] is
/// fatal: the session has already torn itself down when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("framing error: {0}")]
    Framing(&'static str),

    #[error("unknown control frame type {0}")]
    UnknownControlType(u16),

    #[error("unsupported SPDY version {0}")]
    UnsupportedVersion(u16),

    #[error("server pushed stream 0x{0:X} in the client ID space")]
    InvalidPushStream(u32),

    #[error("header decompression failed: {0}")]
    Compression(#[from] CompressionError),

    #[error("transport closed")]
    TransportClosed,

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    /// Whether the session must be closed because of this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Result handed to streams torn down because of this error.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Closed => CloseReason::Complete,
            Self::TransportClosed | Self::Io(_) => CloseReason::Aborted,
            _ => CloseReason::IllegalValue,
        }
    }
}

/// Errors scoped to a single stream. The stream is reset and cleaned up;
/// the session carries on.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("request ended before the header block was complete")]
    IncompleteRequestHeaders,

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("request body exceeds content-length by {0} bytes")]
    BodyTooLong(u64),

    #[error("stream ID space exhausted")]
    StreamIdsExhausted,

    #[error("stream ID 0x{0:X} already registered")]
    DuplicateStreamId(u32),

    #[error("response header block is malformed")]
    MalformedHeaderBlock,

    #[error("response is missing the {0} header")]
    MissingHeader(&'static str),

    #[error("upper case or NUL byte in header name")]
    IllegalHeaderName,

    #[error("transfer-encoding is not allowed in a SPDY response")]
    TransferEncoding,

    #[error("stream in unexpected state {0}")]
    UnexpectedState(&'static str),

    #[error("header compression failed: {0}")]
    Compression(#[from] CompressionError),

    #[error("transport write failed: {0}")]
    Transport(#[from] io::Error),
}

impl StreamError {
    /// Result handed to the transaction when the stream is reset for this error.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Transport(_) => CloseReason::Aborted,
            _ => CloseReason::IllegalValue,
        }
    }
}

/// How a stream ended, as reported to its transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The exchange finished normally.
    Complete,
    /// The server never processed the request; it may be re-issued on a new
    /// connection.
    Reset,
    /// The server cancelled or failed the stream.
    Interrupted,
    /// The server reset the stream with FRAME_TOO_LARGE.
    FrameTooLarge,
    /// Protocol violation on this stream.
    IllegalValue,
    /// A second SYN_REPLY arrived for an already open stream.
    AlreadyOpened,
    /// The session went away underneath the stream.
    Aborted,
    /// The keep-alive ping was not answered in time.
    TimedOut,
    /// The caller cancelled the transaction.
    Cancelled,
}

impl CloseReason {
    /// Whether the request may be transparently retried on a fresh connection.
    pub fn is_retryable(self) -> bool {
        self == Self::Reset
    }

    pub fn is_success(self) -> bool {
        self == Self::Complete
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Complete => "complete",
            Self::Reset => "reset (retryable)",
            Self::Interrupted => "interrupted",
            Self::FrameTooLarge => "frame too large",
            Self::IllegalValue => "illegal value",
            Self::AlreadyOpened => "already opened",
            Self::Aborted => "aborted",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
