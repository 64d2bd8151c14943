//! Tests for session teardown, GOAWAY and transaction cancellation

use spdy_sans_io::frame::{create_control_frame, create_goaway};
use spdy_sans_io::{CloseReason, ControlType, RstCode, SessionConfig, SessionError, TransportStatus};

use super::*;

fn goaway_with_status(last_good: u32, status: u32) -> Vec<u8> {
    let mut payload = last_good.to_be_bytes().to_vec();
    payload.extend_from_slice(&status.to_be_bytes());
    create_control_frame(ControlType::GoAway, 0, &payload)
}

#[test]
fn test_goaway_splits_retryable_from_aborted() {
    let mut session = client();
    let mut server = Server::new();
    let records: Vec<Shared> = ["/1", "/3", "/5", "/7"]
        .iter()
        .map(|path| open_get(&mut session, path).1)
        .collect();
    drain(&mut session);

    session.process(&server.syn_reply(1, OK, true)).unwrap();
    assert_eq!(closed(&records[0]), Some(CloseReason::Complete));

    session.process(&create_goaway(5)).unwrap();
    assert!(session.should_go_away());
    assert_eq!(session.go_away_id(), 5);
    assert!(!session.room_for_more_streams());
    assert!(!session.is_closed());

    session.close(CloseReason::Aborted);
    assert_eq!(closed(&records[1]), Some(CloseReason::Reset));
    assert_eq!(closed(&records[2]), Some(CloseReason::Reset));
    assert_eq!(closed(&records[3]), Some(CloseReason::Aborted));
}

#[test]
fn test_goaway_accepts_trailing_status() {
    let mut session = client();
    let (_handle, record) = open_get(&mut session, "/");
    drain(&mut session);

    session.process(&goaway_with_status(0, 1)).unwrap();
    assert_eq!(session.go_away_id(), 0);

    session.close(CloseReason::Aborted);
    assert_eq!(closed(&record), Some(CloseReason::Aborted));
}

#[test]
fn test_goaway_wrong_length_is_fatal() {
    let mut session = client();
    open_get(&mut session, "/");
    drain(&mut session);

    let frame = create_control_frame(ControlType::GoAway, 0, &[0, 0, 0, 0, 0, 0]);
    assert!(matches!(session.process(&frame), Err(SessionError::Framing(_))));
    assert!(session.is_closed());
}

#[test]
fn test_unsent_streams_are_retryable_after_goaway() {
    let mut session = client_with(SessionConfig::default().with_max_concurrent(1));
    let (_first, first) = open_get(&mut session, "/a");
    let (second_handle, second) = open_get(&mut session, "/b");
    drain(&mut session);
    assert!(session.is_pending_activation(second_handle));

    session.process(&create_goaway(0)).unwrap();
    session.close(CloseReason::Aborted);

    assert_eq!(closed(&first), Some(CloseReason::Aborted));
    assert_eq!(closed(&second), Some(CloseReason::Reset));
}

#[test]
fn test_goaway_closes_once_last_stream_finishes() {
    let mut session = client();
    let mut server = Server::new();
    let (_handle, record) = open_get(&mut session, "/");
    drain(&mut session);

    session.process(&create_goaway(1)).unwrap();
    assert!(!session.is_closed());

    session.process(&server.syn_reply(1, OK, true)).unwrap();
    assert_eq!(closed(&record), Some(CloseReason::Complete));
    assert!(session.is_closed());

    let goaways = of_type(&drain(&mut session), ControlType::GoAway)
        .iter()
        .map(|f| f.word(0))
        .collect::<Vec<_>>();
    assert_eq!(goaways, [0]);

    let (txn, _) = MockTransaction::new(&get_request("/late"));
    assert!(matches!(session.add_stream(txn, 0), Err(SessionError::Closed)));
}

#[test]
fn test_goaway_on_idle_session_closes_immediately() {
    let mut session = client();
    drain(&mut session);

    session.process(&create_goaway(0)).unwrap();
    assert!(session.is_closed());
}

#[test]
fn test_close_is_idempotent() {
    let mut session = client();
    let (_handle, record) = open_get(&mut session, "/");
    drain(&mut session);

    session.close(CloseReason::Complete);
    session.close(CloseReason::Complete);
    session.close(CloseReason::Aborted);

    assert!(session.is_closed());
    assert_eq!(record.borrow().close_count, 1);
    // no GOAWAY was received, so the live stream cannot be retried
    assert_eq!(closed(&record), Some(CloseReason::Aborted));
    assert_eq!(of_type(&drain(&mut session), ControlType::GoAway).len(), 1);
}

#[test]
fn test_closed_session_rejects_input() {
    let mut session = client();
    session.close(CloseReason::Aborted);

    assert!(matches!(session.process(b"x"), Err(SessionError::Closed)));
    // whatever was queued before the close still goes out once
    let frames = drain(&mut session);
    assert_eq!(frames.len(), 1);
    assert!(of_type(&frames, ControlType::GoAway).is_empty());

    let mut out = Vec::new();
    assert!(matches!(
        session.read_segments(&mut out, 1024),
        Err(SessionError::Closed)
    ));
}

#[test]
fn test_close_transaction_sends_cancel() {
    let mut session = client();
    let (handle, record) = open_get(&mut session, "/");
    drain(&mut session);

    session.close_transaction(handle, CloseReason::Cancelled);
    assert_eq!(closed(&record), Some(CloseReason::Cancelled));
    assert_eq!(session.stream_count(), 0);
    assert_eq!(session.concurrent(), 0);
    assert_eq!(rsts(&drain(&mut session)), [(1, RstCode::Cancel.as_u32())]);

    // a second close is a no-op
    session.close_transaction(handle, CloseReason::Cancelled);
    assert_eq!(record.borrow().close_count, 1);
}

#[test]
fn test_close_transaction_before_syn_sends_nothing() {
    let mut session = client();
    let (txn, record) = MockTransaction::streaming(b"");
    let handle = session.add_stream(txn, 0).unwrap();

    session.close_transaction(handle, CloseReason::Cancelled);
    assert_eq!(closed(&record), Some(CloseReason::Cancelled));

    let frames = drain(&mut session);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].control_type(), Some(ControlType::Settings));
}

#[test]
fn test_dont_reuse_closes_after_last_stream() {
    let mut session = client();
    let mut server = Server::new();
    open_get(&mut session, "/");
    drain(&mut session);

    session.dont_reuse();
    assert!(!session.room_for_more_streams());
    assert!(!session.is_closed());

    session.process(&server.syn_reply(1, OK, true)).unwrap();
    assert!(session.is_closed());
    assert_eq!(of_type(&drain(&mut session), ControlType::GoAway).len(), 1);
}

#[test]
fn test_connection_status_goes_to_first_stream() {
    let mut session = client();
    let (_a, first) = open_get(&mut session, "/a");
    let (_b, second) = open_get(&mut session, "/b");
    drain(&mut session);

    session.on_transport_status(TransportStatus::ConnectedTo, 0);
    session.on_transport_status(TransportStatus::SendingTo, 10);

    assert!(first.borrow().statuses.contains(&TransportStatus::ConnectedTo));
    assert!(!second.borrow().statuses.contains(&TransportStatus::ConnectedTo));
}

#[test]
fn test_output_survives_a_slow_transport() {
    struct Trickle {
        out: Vec<u8>,
        budget: usize,
    }

    impl std::io::Write for Trickle {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            if self.budget == 0 {
                return Err(std::io::ErrorKind::WouldBlock.into());
            }
            let n = data.len().min(self.budget);
            self.budget -= n;
            self.out.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let mut session = client();
    let (txn, _record) = MockTransaction::new(&post_request("/", &[b'z'; 3000]));
    session.add_stream(txn, 0).unwrap();

    let mut transport = Trickle { out: Vec::new(), budget: 10 };
    session.flush(&mut transport).unwrap();
    assert_eq!(transport.out.len(), 10);

    // Keep draining in small steps until everything is out.
    for _ in 0..1000 {
        transport.budget = 64;
        session.flush(&mut transport).unwrap();
        if !session.wants_write() {
            break;
        }
    }
    assert!(!session.wants_write());

    let frames = split_frames(&transport.out);
    assert_eq!(frames[0].control_type(), Some(ControlType::Settings));
    let body: usize = data_frames(&frames).iter().map(|f| f.payload.len()).sum();
    assert_eq!(body, 3000);
    assert!(data_frames(&frames).last().unwrap().header.is_fin());
}
