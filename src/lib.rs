//! spdy-sans-io: A sans-I/O SPDY/3 client session engine
//!
//! This crate multiplexes many HTTP/1-style request/response exchanges over a
//! single SPDY/3 connection. It never touches a socket: the caller owns the
//! transport and moves bytes through the session with any `std::io::Read` /
//! `std::io::Write` pair, using `WouldBlock` as the suspend signal.
//!
//! # Features
//!
//! - **Sans-I/O Design**: No async runtime, no sockets, no timers of its own
//! - **SPDY/3 Framing**: SYN_STREAM, SYN_REPLY, RST_STREAM, SETTINGS, NOOP,
//!   PING, GOAWAY, HEADERS, WINDOW_UPDATE and DATA frames
//! - **Shared Header Compression**: One zlib context per direction, seeded
//!   with the SPDY/3 dictionary, kept in wire order even for rejected streams
//! - **Flow Control**: Per-stream send and receive windows, batched acks
//! - **Admission Control**: Concurrency limit with a FIFO activation queue
//! - **Keep-alive and Shutdown**: PING on idle, GOAWAY handling with
//!   retryable/aborted classification of live streams
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use spdy_sans_io::{Session, SessionConfig, StreamHandle};
//!
//! let mut session = Session::new(SessionConfig::default());
//! let handle = session.add_stream(my_transaction, 0)?;
//!
//! // write path: SETTINGS, then SYN_STREAM/DATA frames for the request
//! session.flush(&mut socket)?;
//!
//! // read path: frames from the server end up in the transaction
//! session.process(&bytes_from_socket)?;
//! ```
//!
//! # Architecture
//!
//! - [`frame`]: frame header parsing and frame builders
//! - [`compress`]: the shared deflate/inflate contexts and name/value blocks
//! - [`stream`]: the per-stream send state machine and header flattening
//! - [`session`]: frame dispatch, write scheduling, teardown
//!
//! It does NOT provide:
//! - TCP or TLS (you provide the bytes)
//! - HTTP semantics above framing (caching, redirects, auth)
//! - Server push (pushed streams are refused)

pub mod compress;
pub mod config;
pub mod error;
pub mod frame;
mod output;
pub mod session;
pub mod stream;
pub mod transaction;

pub use compress::{HeaderCompressor, HeaderDecompressor, SPDY_DICTIONARY};
pub use config::SessionConfig;
pub use error::{CloseReason, CompressionError, SessionError, StreamError};
pub use frame::{
    flags, settings_id, ControlType, FrameHeader, RstCode, FRAME_HEADER_LEN, MAX_STREAM_ID,
    SPDY_VERSION,
};
pub use output::IoStatus;
pub use session::Session;
pub use stream::{spdy_priority, StreamHandle, StreamId, UpstreamState};
pub use transaction::{RequestSegment, ResponseFlow, Transaction, TransportStatus};
