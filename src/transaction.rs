//! The boundary between a stream and the logical request it carries.

use crate::error::CloseReason;

/// Request bytes currently offered by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestSegment<'a> {
    /// Unconsumed request bytes: the HTTP/1 request head, then the body.
    Data(&'a [u8]),
    /// Nothing buffered right now; call
    /// [`Session::transaction_has_data_to_write`](crate::Session::transaction_has_data_to_write)
    /// once more arrives.
    WouldBlock,
    /// The request is complete.
    End,
}

/// What a transaction wants after being handed response bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFlow {
    Continue,
    /// The transaction has seen the end of its response and wants no more bytes.
    Done,
}

/// Progress notifications delivered to transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    ResolvingHost,
    ResolvedHost,
    ConnectingTo,
    ConnectedTo,
    /// Request bytes written so far.
    SendingTo,
    /// The request is fully sent and the response is awaited.
    WaitingFor,
    /// Response bytes read so far.
    ReceivingFrom,
}

/// A logical request/response exchange multiplexed onto a session.
///
/// The stream pulls the request through [`request_segment`](Self::request_segment)
/// and [`consume_request`](Self::consume_request), and pushes the flattened
/// HTTP/1 response head followed by the body through
/// [`write_response_segment`](Self::write_response_segment).
pub trait Transaction {
    fn request_segment(&mut self) -> RequestSegment<'_>;

    /// Mark the first `count` bytes of the last offered segment as sent.
    fn consume_request(&mut self, count: usize);

    fn write_response_segment(&mut self, data: &[u8]) -> ResponseFlow;

    fn on_transport_status(&mut self, _status: TransportStatus, _progress: u64) {}

    /// Called exactly once, when the stream carrying this transaction is torn down.
    fn close(&mut self, reason: CloseReason);
}
