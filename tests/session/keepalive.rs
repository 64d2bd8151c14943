//! Tests for keep-alive PINGs and idle accounting

use std::time::{Duration, Instant};

use spdy_sans_io::frame::{create_data_frame, create_ping};
use spdy_sans_io::{CloseReason, ControlType, SessionConfig};

use super::*;

fn pings(frames: &[WireFrame]) -> Vec<u32> {
    of_type(frames, ControlType::Ping)
        .iter()
        .map(|f| f.word(0))
        .collect()
}

#[test]
fn test_idle_session_sends_ping() {
    let base = Instant::now();
    let mut session = client();
    drain(&mut session);

    session.read_timeout_tick(base + Duration::from_secs(60));
    assert_eq!(pings(&drain(&mut session)), [1]);

    // still outstanding, not yet timed out: nothing new
    session.read_timeout_tick(base + Duration::from_secs(62));
    assert!(pings(&drain(&mut session)).is_empty());
    assert!(!session.is_closed());
}

#[test]
fn test_recent_read_suppresses_ping() {
    let base = Instant::now();
    let mut session = client();
    drain(&mut session);

    session.read_timeout_tick(base + Duration::from_secs(10));
    assert!(pings(&drain(&mut session)).is_empty());
}

#[test]
fn test_unanswered_ping_times_out() {
    let base = Instant::now();
    let mut session = client();
    let (_handle, record) = open_get(&mut session, "/");
    drain(&mut session);

    session.read_timeout_tick(base + Duration::from_secs(60));
    session.read_timeout_tick(base + Duration::from_secs(69));

    assert!(session.is_closed());
    assert_eq!(closed(&record), Some(CloseReason::TimedOut));
    // a timeout is not a clean close
    assert!(of_type(&drain(&mut session), ControlType::GoAway).is_empty());
}

#[test]
fn test_ping_reply_clears_outstanding_ping() {
    let base = Instant::now();
    let mut session = client();
    drain(&mut session);

    session.read_timeout_tick(base + Duration::from_secs(60));
    assert_eq!(pings(&drain(&mut session)), [1]);

    session.process(&create_ping(1)).unwrap();
    // the reply is not echoed
    assert!(pings(&drain(&mut session)).is_empty());

    session.read_timeout_tick(base + Duration::from_secs(69));
    assert!(!session.is_closed());
    assert_eq!(pings(&drain(&mut session)), [3]);
}

#[test]
fn test_server_ping_is_echoed() {
    let mut session = client();
    drain(&mut session);

    session.process(&create_ping(2)).unwrap();
    session.process(&create_ping(8)).unwrap();
    assert_eq!(pings(&drain(&mut session)), [2, 8]);
}

#[test]
fn test_zero_threshold_disables_ping() {
    let base = Instant::now();
    let mut session = client_with(SessionConfig::default().with_ping_threshold(Duration::ZERO));
    drain(&mut session);

    session.read_timeout_tick(base + Duration::from_secs(3600));
    assert!(pings(&drain(&mut session)).is_empty());
    assert!(!session.is_closed());
}

#[test]
fn test_custom_ping_timings() {
    let base = Instant::now();
    let config = SessionConfig::default()
        .with_ping_threshold(Duration::from_secs(5))
        .with_ping_timeout(Duration::from_secs(1));
    let mut session = client_with(config);
    drain(&mut session);

    session.read_timeout_tick(base + Duration::from_secs(6));
    assert_eq!(pings(&drain(&mut session)), [1]);

    session.read_timeout_tick(base + Duration::from_secs(7));
    assert!(session.is_closed());
}

#[test]
fn test_idle_time_tracks_response_data() {
    let mut session = client();
    let mut server = Server::new();
    open_get(&mut session, "/");
    drain(&mut session);

    session.process(&server.syn_reply(1, OK, false)).unwrap();
    session.process(&create_data_frame(1, false, b"x")).unwrap();
    let after_data = Instant::now();

    let later = after_data + Duration::from_secs(5);
    assert!(session.idle_time(later) >= Duration::from_secs(5));
    assert!(session.idle_time(after_data) < Duration::from_secs(5));
}
