use super::*;
use crate::candidate::CandidateType;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn session_with_stream() -> (Session, usize) {
    let mut config = AgentConfig::default();
    config.include_loopback = true;
    let mut session = Session::new(config, 1);
    let stream = session.add_stream();
    session.add_component(stream, 0, 50000, 50060).unwrap();
    (session, stream)
}

#[test]
fn test_sdp_common_lines() {
    let (session, _) = session_with_stream();
    let lines = session.create_sdp();

    assert_eq!(lines[0], "a=ice-full");
    assert!(lines[1].starts_with("a=ice-pwd:"));
    assert!(lines[2].starts_with("a=ice-ufrag:"));
    assert_eq!(session.local_ufrag().len(), 4);
    assert_eq!(session.local_pwd().len(), 22);
}

#[test]
fn test_process_sdp_offer_fills_remote_candidates() {
    let (mut session, stream) = session_with_stream();

    let lines = vec![
        "1845501695 1 UDP 2113929471 192.168.1.20 50000 typ host".to_owned(),
        "1845501695 1 udp 1677721855 203.0.113.9 40000 typ srflx raddr 192.168.1.20 rport 50000"
            .to_owned(),
    ];
    let contains = session.process_sdp_offer(
        stream,
        &lines,
        Some(addr("203.0.113.9:40000")),
        false,
    );

    assert!(contains);
    let remotes = session.remote_candidates(stream).unwrap();
    assert_eq!(remotes.len(), 2);
    assert!(session.candidate_list_contains(stream, addr("192.168.1.20:50000")));
    assert_eq!(
        session.remote_reflexive_address(stream, 1),
        Some(addr("203.0.113.9:40000"))
    );
}

#[test]
fn test_process_sdp_offer_delete_relayed_parks_relays() {
    let (mut session, stream) = session_with_stream();

    let lines = vec![
        "1845501695 1 UDP 2113929471 192.168.1.20 50000 typ host".to_owned(),
        "50332672 1 UDP 255 198.51.100.1 49152 typ relay raddr 203.0.113.9 rport 40000".to_owned(),
    ];
    session.process_sdp_offer(stream, &lines, None, true);

    let remotes = session.remote_candidates(stream).unwrap();
    assert!(remotes.iter().all(|c| c.kind != CandidateType::Relay));
    // the relay is parked, not forgotten
    assert_eq!(
        session.remote_relayed_address(stream, 1),
        Some(addr("198.51.100.1:49152"))
    );
}

#[test]
fn test_process_sdp_offer_skips_bad_lines() {
    let (mut session, stream) = session_with_stream();

    let lines = vec![
        "1845501695 1 TCP 2113929471 192.168.1.20 9 typ host".to_owned(), // wrong transport
        "1845501695 1 UDP 2113929471 192.168.1.21 50000 typ host".to_owned(),
    ];
    session.process_sdp_offer(stream, &lines, None, false);

    let remotes = session.remote_candidates(stream).unwrap();
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].addr, addr("192.168.1.21:50000"));
}

#[test]
fn test_remote_password_change_flags_restart() {
    let (mut session, _) = session_with_stream();

    session.set_remote_pwd("first-password", None);
    assert!(!session.must_restart());
    session.set_remote_pwd("first-password", None);
    assert!(!session.must_restart());
    session.set_remote_pwd("second-password", None);
    assert!(session.must_restart());
}

#[test]
fn test_find_stream_and_component_by_port() {
    let (session, stream) = session_with_stream();

    assert_eq!(session.find_stream_and_component(false, 50000), Some((stream, 1)));
    assert_eq!(session.find_stream_and_component(true, 50060), Some((stream, 1)));
    assert_eq!(session.find_stream_and_component(false, 1), None);
}

#[test]
fn test_state_join_of_streams() {
    let (mut session, first) = session_with_stream();
    let second = session.add_stream();
    session.add_component(second, 0, 50002, 50062).unwrap();
    session.state = RunningState::ConnCheck;

    session.streams.get_mut(&first).unwrap().state = RunningState::Success;
    session.streams.get_mut(&second).unwrap().state = RunningState::ConnCheck;
    session.refresh_state();
    assert_eq!(session.state(), RunningState::ConnCheck);

    session.streams.get_mut(&second).unwrap().state = RunningState::Failed;
    session.refresh_state();
    assert_eq!(session.state(), RunningState::Success);
    assert!(session.finished());

    session.streams.get_mut(&first).unwrap().state = RunningState::Failed;
    session.refresh_state();
    assert_eq!(session.state(), RunningState::Failed);
}

#[test]
fn test_application_payload_is_not_consumed() {
    let (mut session, stream) = session_with_stream();

    // RTP-looking bytes
    let rtp = [0x80u8, 0x60, 0x00, 0x01, 0, 0, 0, 0];
    assert!(!session.process_data(stream, 1, &rtp, addr("10.0.0.1:5004")));

    // garbage short datagram
    assert!(!session.process_data(stream, 1, &[1, 2, 3], addr("10.0.0.1:5004")));
}

#[test]
fn test_refresh_credentials_propagates() {
    let (mut session, stream) = session_with_stream();
    let old_pwd = session.local_pwd().to_owned();
    session.refresh_credentials();
    assert_ne!(session.local_pwd(), old_pwd);
    assert_eq!(
        session.streams.get(&stream).unwrap().local_pwd,
        session.local_pwd()
    );
}
