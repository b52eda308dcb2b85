use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::*;
use crate::events::StageHandler;

#[test]
fn test_datagram_classifiers() {
    let mut stun_msg = Message::new();
    stun_msg.set_type(stun::message::BINDING_REQUEST);
    stun_msg.new_transaction_id();
    assert!(Agent::is_stun(&stun_msg.raw));
    assert!(!Agent::is_rtp(&stun_msg.raw));
    assert!(!Agent::is_channel_data(&stun_msg.raw, None));

    let rtp = [0x80u8, 0x60, 0, 1, 0, 0, 0, 0];
    assert!(Agent::is_rtp(&rtp));
    assert!(!Agent::is_stun(&rtp));

    let frame = Agent::make_channel_data(0x4001, b"payload");
    assert!(Agent::is_channel_data(&frame, None));
    assert!(Agent::is_channel_data(&frame, Some(0x4001)));
    assert!(!Agent::is_channel_data(&frame, Some(0x4002)));
    assert_eq!(
        Agent::decode_channel_data(&frame),
        Some((0x4001, b"payload".to_vec()))
    );
}

#[test]
fn test_decode_data_indication() {
    use turn::proto::data::Data;
    use turn::proto::peeraddr::PeerAddress;

    let peer: SocketAddr = "203.0.113.8:52000".parse().unwrap();
    let mut m = Message::new();
    m.build(&[
        &stun::message::MessageType::new(METHOD_DATA, CLASS_INDICATION),
        &stun::message::TransactionId::new(),
        &PeerAddress {
            ip: peer.ip(),
            port: peer.port(),
        },
        &Data(b"media".to_vec()),
    ])
    .unwrap();

    let decoded = Agent::decode_data_indication(&m.raw);
    assert_eq!(decoded, Some((peer, b"media".to_vec())));

    // a plain binding request is not a data indication
    let mut plain = Message::new();
    plain.set_type(stun::message::BINDING_REQUEST);
    plain.new_transaction_id();
    assert!(Agent::decode_data_indication(&plain.raw).is_none());
}

struct FlagHandler {
    gathered: Arc<AtomicBool>,
    tag_seen: Arc<AtomicBool>,
}

impl StageHandler for FlagHandler {
    fn on_gathered(&mut self, tag: u64) {
        self.gathered.store(true, Ordering::SeqCst);
        if tag == 42 {
            self.tag_seen.store(true, Ordering::SeqCst);
        }
    }
}

#[test]
fn test_gather_without_servers_raises_on_gathered() {
    let mut config = AgentConfig::default();
    config.include_loopback = true;
    config.use_ipv6 = false;

    let agent = Agent::new(config);
    let stream = agent.add_stream();
    agent.add_component(stream, 9, 50100, 0).unwrap();

    let gathered = Arc::new(AtomicBool::new(false));
    let tag_seen = Arc::new(AtomicBool::new(false));
    agent.set_event_handler(
        Box::new(FlagHandler {
            gathered: gathered.clone(),
            tag_seen: tag_seen.clone(),
        }),
        42,
    );

    agent.gather_candidates();

    assert!(gathered.load(Ordering::SeqCst));
    assert!(tag_seen.load(Ordering::SeqCst));
    assert_eq!(agent.state(), IceState::Gathered);
    assert!(!agent.candidate_list(stream, Some(1)).is_empty());
}

#[test]
fn test_stream_topology() {
    let agent = Agent::new(AgentConfig::default());
    let stream = agent.add_stream();
    let component = agent.add_component(stream, 0, 51000, 51060).unwrap();

    assert!(agent.has_stream(stream));
    assert!(agent.has_component(stream, component));
    assert!(!agent.has_component(stream, component + 1));
    assert_eq!(
        agent.find_stream_and_component(false, 51000),
        Some((stream, component))
    );

    agent.set_component_port(stream, component, 52000, 0);
    assert_eq!(
        agent.find_stream_and_component(false, 52000),
        Some((stream, component))
    );

    agent.remove_stream(stream);
    assert!(!agent.has_stream(stream));
}
