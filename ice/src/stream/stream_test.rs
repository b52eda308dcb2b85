use super::*;
use crate::agent::config::AgentConfig;
use crate::control::AttrControlling;
use crate::priority::PriorityAttr;
use crate::use_candidate::UseCandidateAttr;

use stun::fingerprint::FINGERPRINT;
use stun::message::*;
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn candidate(kind: CandidateType, component: u16, a: &str) -> Candidate {
    let mut c = Candidate::new(kind, component, addr(a));
    c.compute_priority();
    c.compute_foundation();
    c
}

/// A stream wired up as if gathering and the SDP exchange already happened.
fn checking_stream(role: AgentRole) -> Stream {
    let mut config = AgentConfig::default();
    config.include_loopback = true;
    config.nomination_wait = Duration::ZERO;

    let mut stream = Stream::new(0, 7, config);
    stream.add_component(0, 50000, 50060);
    stream.role = role;
    stream.state = RunningState::ConnCheck;
    stream.tie_breaker = 0x0102030405060708;
    stream.local_ufrag = "lfrg".to_owned();
    stream.local_pwd = "localpasswordlocalpass".to_owned();
    stream.remote_ufrag = "rfrg".to_owned();
    stream.remote_pwd = "remotepasswordremotepw".to_owned();
    stream
}

fn incoming_check(
    stream: &Stream,
    priority: u32,
    controlling_tie_breaker: Option<u64>,
    use_candidate: bool,
) -> Message {
    let username = TextAttribute::new(
        stun::attributes::ATTR_USERNAME,
        format!("{}:{}", stream.local_ufrag, stream.remote_ufrag),
    );
    let integrity = stun::integrity::MessageIntegrity::new_short_term(&stream.local_pwd);
    let priority = PriorityAttr(priority);
    let controlling = AttrControlling(controlling_tie_breaker.unwrap_or_default());
    let use_cand = UseCandidateAttr;

    let mut setters: Vec<&dyn Setter> = vec![&BINDING_REQUEST];
    let id = TransactionId::new();
    setters.push(&id);
    setters.push(&username);
    setters.push(&priority);
    if controlling_tie_breaker.is_some() {
        setters.push(&controlling);
    }
    if use_candidate {
        setters.push(&use_cand);
    }
    setters.push(&integrity);
    setters.push(&FINGERPRINT);

    let mut m = Message::new();
    m.build(&setters).unwrap();
    // decode back so attribute list and raw mirror a received packet
    let mut received = Message::new();
    received.write(&m.raw).unwrap();
    received
}

#[test]
fn test_triggered_check_on_peer_reflexive_discovery() {
    let mut stream = checking_stream(AgentRole::Controlled);
    stream
        .local_candidates
        .push(candidate(CandidateType::Host, 1, "127.0.0.1:50000"));
    stream
        .remote_candidates
        .push(candidate(CandidateType::Host, 1, "10.0.0.1:50000"));

    // a check arrives from an address absent from the remote candidates
    let source = addr("127.0.0.1:52000");
    let msg = incoming_check(&stream, 0x7E000100, None, false);
    assert!(stream.process_data(&msg, source, 1, false));

    // a peer-reflexive remote candidate was synthesized with the priority
    // of the PRIORITY attribute and a fresh foundation
    let prflx = stream
        .remote_candidates
        .iter()
        .find(|c| c.kind == CandidateType::PeerReflexive)
        .expect("peer-reflexive remote candidate");
    assert_eq!(prflx.addr, source);
    assert_eq!(prflx.priority, 0x7E000100);
    assert!(!prflx.foundation.is_empty());

    // the new pair is scheduled as a triggered check
    let pair = stream
        .checklist
        .pairs()
        .iter()
        .find(|p| p.remote.addr == source)
        .expect("triggered pair");
    assert_eq!(pair.state, PairState::Waiting);
    assert_eq!(pair.role, PairRole::Triggered);

    // and the response goes back to the request source
    let response = stream.get_data_to_send().expect("response queued");
    assert!(response.response);
    assert_eq!(response.destination, source);

    let mut parsed = Message::new();
    parsed.write(&response.data).unwrap();
    assert_eq!(parsed.typ, BINDING_SUCCESS);
    let mut mapped = XorMappedAddress::default();
    mapped.get_from(&parsed).unwrap();
    assert_eq!(SocketAddr::new(mapped.ip, mapped.port), source);
}

#[test]
fn test_role_conflict_lower_side_yields() {
    // both sides controlling; ours holds the lower tie-breaker
    let mut stream = checking_stream(AgentRole::Controlling);
    stream.tie_breaker = 0x0102030405060708;
    stream
        .local_candidates
        .push(candidate(CandidateType::Host, 1, "127.0.0.1:50000"));

    let msg = incoming_check(&stream, 0x7E000100, Some(0x0102030405060709), false);
    assert!(stream.process_data(&msg, addr("127.0.0.1:52000"), 1, false));

    // we switched and answered success
    assert_eq!(stream.role, AgentRole::Controlled);
    let response = stream.get_data_to_send().expect("response queued");
    let mut parsed = Message::new();
    parsed.write(&response.data).unwrap();
    assert_eq!(parsed.typ, BINDING_SUCCESS);
}

#[test]
fn test_role_conflict_higher_side_answers_487() {
    let mut stream = checking_stream(AgentRole::Controlling);
    stream.tie_breaker = 0x0102030405060709;
    stream
        .local_candidates
        .push(candidate(CandidateType::Host, 1, "127.0.0.1:50000"));

    let msg = incoming_check(&stream, 0x7E000100, Some(0x0102030405060708), false);
    assert!(stream.process_data(&msg, addr("127.0.0.1:52000"), 1, false));

    assert_eq!(stream.role, AgentRole::Controlling);
    let response = stream.get_data_to_send().expect("response queued");
    let mut parsed = Message::new();
    parsed.write(&response.data).unwrap();
    assert_eq!(parsed.typ, BINDING_ERROR);

    let mut error = stun::error_code::ErrorCodeAttribute::default();
    error.get_from(&parsed).unwrap();
    assert_eq!(error.code.0, 487);
}

#[test]
fn test_487_response_switches_role_and_replays_check() {
    let mut stream = checking_stream(AgentRole::Controlling);

    let local = candidate(CandidateType::Host, 1, "192.168.1.10:50000");
    let remote = candidate(CandidateType::Host, 1, "10.0.0.1:50000");
    stream.local_candidates.push(local.clone());
    stream.remote_candidates.push(remote.clone());

    let mut pair = CandidatePair::new(local, remote.clone(), true);
    pair.state = PairState::Waiting;
    stream.checklist.add(pair);
    let tid = stream
        .run_check_list(PairRole::Regular, PairState::Waiting)
        .unwrap();

    // the peer held the higher tie-breaker and answered 487
    let mut response = Message::new();
    response
        .build(&[&BINDING_ERROR, &tid, &stun::error_code::CODE_ROLE_CONFLICT])
        .unwrap();
    let mut received = Message::new();
    received.write(&response.raw).unwrap();

    assert!(stream.process_data(&received, remote.addr, 1, false));
    assert_eq!(stream.role, AgentRole::Controlled);

    // the same check replays under the corrected role
    let t = stream.transactions.get_mut(tid).unwrap();
    assert_eq!(t.state, crate::transaction::TransactionState::Running);
    match &t.body {
        Body::Check(check) => assert_eq!(check.role, AgentRole::Controlled),
        _ => panic!("expected a connectivity check"),
    }
}

#[test]
fn test_request_without_credentials_gets_400() {
    let mut stream = checking_stream(AgentRole::Controlled);
    stream
        .local_candidates
        .push(candidate(CandidateType::Host, 1, "127.0.0.1:50000"));

    let mut m = Message::new();
    m.build(&[&BINDING_REQUEST, &TransactionId::new()]).unwrap();

    assert!(stream.process_data(&m, addr("127.0.0.1:52000"), 1, false));
    let response = stream.get_data_to_send().expect("response queued");
    let mut parsed = Message::new();
    parsed.write(&response.data).unwrap();
    assert_eq!(parsed.typ, BINDING_ERROR);

    let mut error = stun::error_code::ErrorCodeAttribute::default();
    error.get_from(&parsed).unwrap();
    assert_eq!(error.code.0, 400);
}

#[test]
fn test_successful_check_promotes_pair_and_unfreezes_siblings() {
    let mut stream = checking_stream(AgentRole::Controlling);

    let local = candidate(CandidateType::Host, 1, "192.168.1.10:50000");
    let remote = candidate(CandidateType::Host, 1, "10.0.0.1:50000");
    stream.local_candidates.push(local.clone());
    stream.remote_candidates.push(remote.clone());

    let mut first = CandidatePair::new(local.clone(), remote.clone(), true);
    first.state = PairState::Waiting;
    stream.checklist.add(first);

    // a sibling with the same foundation pair stays frozen for now
    let local2 = candidate(CandidateType::Host, 2, "192.168.1.10:50001");
    let remote2 = candidate(CandidateType::Host, 2, "10.0.0.1:50001");
    let mut sibling = CandidatePair::new(local2, remote2, true);
    sibling.state = PairState::Frozen;
    stream.checklist.add(sibling);

    // let the scheduler pick up the waiting pair
    let tid = stream
        .run_check_list(PairRole::Regular, PairState::Waiting)
        .expect("check created");

    // and answer it: mapped address is our own host candidate
    let mut response = Message::new();
    let integrity = stun::integrity::MessageIntegrity::new_short_term(&stream.remote_pwd);
    response
        .build(&[
            &BINDING_SUCCESS,
            &tid,
            &XorMappedAddress {
                ip: local.addr.ip(),
                port: local.addr.port(),
            },
            &integrity,
            &FINGERPRINT,
        ])
        .unwrap();
    let mut received = Message::new();
    received.write(&response.raw).unwrap();

    assert!(stream.process_data(&received, remote.addr, 1, false));

    let checked = stream
        .checklist
        .pairs()
        .iter()
        .find(|p| p.local.component == 1 && p.role == PairRole::Valid)
        .expect("valid pair");
    assert_eq!(checked.state, PairState::Succeeded);
    // the controlling side started nominating right away (LAN remote)
    assert_eq!(checked.nomination, Nomination::Started);

    let sibling = stream
        .checklist
        .pairs()
        .iter()
        .find(|p| p.local.component == 2)
        .unwrap();
    assert_eq!(sibling.state, PairState::Waiting, "same foundation unfroze");
}

#[test]
fn test_use_candidate_on_succeeded_pair_completes_controlled_side() {
    let mut stream = checking_stream(AgentRole::Controlled);

    let local = candidate(CandidateType::Host, 1, "127.0.0.1:50000");
    let remote_source = addr("127.0.0.1:52000");
    let mut remote = candidate(CandidateType::Host, 1, "127.0.0.1:52000");
    remote.compute_priority();
    stream.local_candidates.push(local.clone());
    stream.remote_candidates.push(remote.clone());

    let mut pair = CandidatePair::new(local, remote, false);
    pair.state = PairState::Succeeded;
    pair.role = PairRole::Valid;
    stream.checklist.add(pair);

    // the nominating re-check arrives with USE-CANDIDATE
    let msg = incoming_check(&stream, 0x7E000100, None, true);
    assert!(stream.process_data(&msg, remote_source, 1, false));

    let pair = &stream.checklist.pairs()[0];
    assert_eq!(pair.nomination, Nomination::Finished);
    assert_eq!(stream.state(), RunningState::Success);
    assert!(stream.can_transmit);
    assert_eq!(stream.remote_address(1), Some(remote_source));
}

#[test]
fn test_nomination_wait_prefers_lan_pair() {
    let mut stream = checking_stream(AgentRole::Controlling);
    stream.config.nomination_wait = Duration::from_millis(1);

    let mut lan = CandidatePair::new(
        candidate(CandidateType::Host, 1, "192.168.1.10:50000"),
        candidate(CandidateType::Host, 1, "10.0.0.1:50000"),
        true,
    );
    lan.state = PairState::Succeeded;
    lan.role = PairRole::Valid;

    let mut reflexive = CandidatePair::new(
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.5:40000"),
        candidate(CandidateType::ServerReflexive, 1, "203.0.113.9:40000"),
        true,
    );
    reflexive.state = PairState::Succeeded;
    reflexive.role = PairRole::Valid;

    stream.checklist.add(reflexive);
    stream.checklist.add(lan);

    // the wait window for the component expired a while ago
    stream
        .components
        .get_mut(&1)
        .unwrap()
        .nomination_wait_start = Some(Instant::now() - Duration::from_millis(50));

    stream.check_nominated_all();

    let nominated: Vec<&CandidatePair> = stream
        .checklist
        .pairs()
        .iter()
        .filter(|p| p.nomination != Nomination::None)
        .collect();
    assert_eq!(nominated.len(), 1);
    assert!(nominated[0].is_lan_only(), "the LAN pair wins the nomination");

    // the nomination goes out with USE-CANDIDATE
    let tid = nominated[0].transaction.expect("nomination check queued");
    let t = stream.transactions.get_mut(tid).unwrap();
    match &t.body {
        Body::Check(check) => assert!(check.use_candidate),
        _ => panic!("expected a connectivity check"),
    }
}

#[test]
fn test_gather_host_only_without_servers() {
    let mut config = AgentConfig::default();
    config.include_loopback = true;
    config.use_ipv6 = false;

    let mut stream = Stream::new(0, 1, config);
    stream.add_component(0, 50000, 0);
    stream.local_ufrag = "abcd".to_owned();
    stream.local_pwd = "p".repeat(22);

    stream.gather_candidates();

    // no servers configured: gathering concludes synchronously
    assert_eq!(stream.state(), RunningState::CreatingSdp);
    assert!(!stream.candidate_lines(Some(1)).is_empty());
    assert!(stream.default_address(1).is_some());
    assert!(stream
        .local_candidates
        .iter()
        .all(|c| c.kind == CandidateType::Host && c.ready && !c.failed));
}
