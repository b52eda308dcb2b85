use std::net::SocketAddr;
use std::time::Duration;

use stun::error_code::CODE_UNAUTHORIZED;
use stun::integrity::MessageIntegrity;
use stun::message::*;
use stun::textattrs::TextAttribute;
use stun::xoraddr::XorMappedAddress;
use turn::proto::lifetime::Lifetime;
use turn::proto::relayaddr::RelayedAddress;

use super::binding::ClientBinding;
use super::relaying::{AuthState, ChannelNumberAllocator, ClientAllocate};
use super::*;

fn addr(s: &str) -> SocketAddr {
    s.parse().unwrap()
}

fn server() -> SocketAddr {
    addr("203.0.113.20:3478")
}

fn rto() -> Duration {
    Duration::from_millis(50)
}

fn parse(raw: &[u8]) -> Message {
    let mut m = Message::new();
    m.write(raw).unwrap();
    m
}

fn binding_success(id: TransactionId, mapped: SocketAddr) -> Message {
    let mut m = Message::new();
    m.build(&[
        &BINDING_SUCCESS,
        &id,
        &XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        },
    ])
    .unwrap();
    m
}

#[test]
fn test_client_binding_success() {
    let mut t = Transaction::new(
        Body::Binding(ClientBinding::default()),
        server(),
        1,
        rto(),
    );

    let first = t.generate_data(false).expect("first send is immediate");
    let request = parse(&first);
    assert_eq!(request.typ, BINDING_REQUEST);
    assert_eq!(request.transaction_id, t.id);

    // within the RTO nothing retransmits
    assert!(t.generate_data(false).is_none());

    let mapped = addr("203.0.113.5:40000");
    let response = binding_success(t.id, mapped);
    assert!(t.process_data(&response, server()));
    assert_eq!(t.state, TransactionState::Succeeded);

    match t.completion().detail {
        CompletionDetail::Binding { mapped: m, .. } => assert_eq!(m, Some(mapped)),
        _ => panic!("wrong detail"),
    }
}

#[test]
fn test_client_binding_ignores_other_transaction() {
    let mut t = Transaction::new(
        Body::Binding(ClientBinding::default()),
        server(),
        1,
        rto(),
    );
    t.generate_data(false).unwrap();

    let response = binding_success(TransactionId::new(), addr("203.0.113.5:40000"));
    assert!(!t.process_data(&response, server()));
    assert_eq!(t.state, TransactionState::Running);
}

fn unauthorized(id: TransactionId, realm: &str, nonce: &str) -> Message {
    let mut m = Message::new();
    m.build(&[
        &MessageType::new(METHOD_ALLOCATE, CLASS_ERROR_RESPONSE),
        &id,
        &CODE_UNAUTHORIZED,
        &TextAttribute::new(stun::attributes::ATTR_REALM, realm.to_owned()),
        &TextAttribute::new(stun::attributes::ATTR_NONCE, nonce.to_owned()),
    ])
    .unwrap();
    m
}

fn allocate_success(id: TransactionId, relayed: SocketAddr, mapped: SocketAddr) -> Message {
    let mut m = Message::new();
    m.build(&[
        &MessageType::new(METHOD_ALLOCATE, CLASS_SUCCESS_RESPONSE),
        &id,
        &RelayedAddress {
            ip: relayed.ip(),
            port: relayed.port(),
        },
        &XorMappedAddress {
            ip: mapped.ip(),
            port: mapped.port(),
        },
        &Lifetime(Duration::from_secs(600)),
    ])
    .unwrap();
    m
}

#[test]
fn test_allocate_401_challenge_retry() {
    let auth = AuthState::new("u".into(), "p".into(), String::new(), String::new());
    let mut t = Transaction::new(
        Body::Allocate(ClientAllocate::new(auth, Duration::from_secs(600))),
        server(),
        1,
        rto(),
    );

    // the probe goes out without credentials
    let probe = parse(&t.generate_data(false).unwrap());
    assert!(probe.contains(stun::attributes::ATTR_REQUESTED_TRANSPORT));
    assert!(!probe.contains(stun::attributes::ATTR_USERNAME));
    assert!(!probe.contains(stun::attributes::ATTR_MESSAGE_INTEGRITY));

    let first_id = t.id;
    let challenge = unauthorized(first_id, "example.org", "n1");
    assert!(t.process_data(&challenge, server()));

    // the retry runs under a fresh transaction id with full credentials
    assert_eq!(t.state, TransactionState::Running);
    assert_ne!(t.id, first_id);

    let retry_raw = t.generate_data(false).expect("retry is immediate");
    let mut retry = parse(&retry_raw);
    assert_eq!(
        TextAttribute::get_from_as(&retry, stun::attributes::ATTR_USERNAME)
            .unwrap()
            .text,
        "u"
    );
    assert_eq!(
        TextAttribute::get_from_as(&retry, stun::attributes::ATTR_REALM)
            .unwrap()
            .text,
        "example.org"
    );
    assert_eq!(
        TextAttribute::get_from_as(&retry, stun::attributes::ATTR_NONCE)
            .unwrap()
            .text,
        "n1"
    );
    assert!(retry.contains(stun::attributes::ATTR_LIFETIME));

    // integrity is keyed with MD5(username:realm:password)
    MessageIntegrity::new_long_term("u", "example.org", "p")
        .check(&mut retry)
        .expect("long-term integrity must verify");

    let relayed = addr("198.51.100.1:49152");
    let mapped = addr("203.0.113.5:40000");
    assert!(t.process_data(&allocate_success(t.id, relayed, mapped), server()));
    assert_eq!(t.state, TransactionState::Succeeded);

    match t.completion().detail {
        CompletionDetail::Allocate {
            reflexive,
            relayed: r,
            lifetime,
            realm,
            nonce,
            ..
        } => {
            assert_eq!(reflexive, Some(mapped));
            assert_eq!(r, Some(relayed));
            assert_eq!(lifetime, Duration::from_secs(600));
            assert_eq!(realm, "example.org");
            assert_eq!(nonce, "n1");
        }
        _ => panic!("wrong detail"),
    }
}

#[test]
fn test_allocate_second_401_is_terminal() {
    let auth = AuthState::new("u".into(), "p".into(), String::new(), String::new());
    let mut t = Transaction::new(
        Body::Allocate(ClientAllocate::new(auth, Duration::from_secs(600))),
        server(),
        1,
        rto(),
    );
    t.generate_data(false).unwrap();

    assert!(t.process_data(&unauthorized(t.id, "example.org", "n1"), server()));
    assert_eq!(t.state, TransactionState::Running);
    t.generate_data(false).unwrap();

    // wrong password keeps provoking 401; the second one is fatal
    assert!(t.process_data(&unauthorized(t.id, "example.org", "n2"), server()));
    assert_eq!(t.state, TransactionState::Failed);
}

#[test]
fn test_keepalive_settle_restarts() {
    let mut t = Transaction::new(
        Body::Binding(ClientBinding::default()),
        server(),
        1,
        rto(),
    );
    t.keepalive = true;
    t.interval = Duration::from_millis(10);
    let id = t.id;

    let mut list = TransactionList::new();
    list.add_regular(t);

    let response = binding_success(id, addr("203.0.113.5:40000"));
    let consumed = list.process_incoming(&response, server()).unwrap();
    assert_eq!(consumed, id);

    list.settle(id);
    let t = list.get_mut(id).unwrap();
    assert_eq!(t.state, TransactionState::Running);
    assert!(!t.removed);
}

#[test]
fn test_non_keepalive_settle_removes() {
    let mut t = Transaction::new(
        Body::Binding(ClientBinding::default()),
        server(),
        1,
        rto(),
    );
    let id = t.id;

    let mut list = TransactionList::new();
    list.add_regular(t);

    let response = binding_success(id, addr("203.0.113.5:40000"));
    list.process_incoming(&response, server()).unwrap();
    list.settle(id);
    assert!(list.get_mut(id).unwrap().removed);
    assert!(list.next_runnable().is_none());
}

#[test]
fn test_prioritized_drains_first() {
    let regular = Transaction::new(
        Body::Binding(ClientBinding::default()),
        server(),
        1,
        rto(),
    );
    let prioritized = Transaction::new(
        Body::Binding(ClientBinding::default()),
        addr("203.0.113.21:3478"),
        1,
        rto(),
    );
    let regular_id = regular.id;
    let prioritized_id = prioritized.id;

    let mut list = TransactionList::new();
    list.add_regular(regular);
    list.add_prioritized(prioritized);

    assert_eq!(list.next_runnable(), Some(prioritized_id));
    assert_eq!(list.next_runnable(), Some(regular_id));
}

#[test]
fn test_prioritize_moves_between_queues() {
    let a = Transaction::new(Body::Binding(ClientBinding::default()), server(), 1, rto());
    let b = Transaction::new(
        Body::Binding(ClientBinding::default()),
        addr("203.0.113.21:3478"),
        1,
        rto(),
    );
    let a_id = a.id;
    let b_id = b.id;

    let mut list = TransactionList::new();
    list.add_regular(a);
    list.add_regular(b);

    list.prioritize(b_id);
    assert_eq!(list.next_runnable(), Some(b_id));
    assert_eq!(list.next_runnable(), Some(a_id));
    assert_eq!(list.count(), 2);
}

#[test]
fn test_erase_where_hides_transactions() {
    let t = Transaction::new(Body::Binding(ClientBinding::default()), server(), 1, rto());
    let id = t.id;
    let mut list = TransactionList::new();
    list.add_regular(t);

    list.erase_where(|t| t.id == id);
    assert!(list.next_runnable().is_none());
    assert!(!list.exists_where(|t| t.id == id));

    // soft removal keeps the record for resurrection
    assert!(list.get_mut(id).is_some());
}

#[test]
fn test_channel_number_allocator_stays_in_range() {
    let mut alloc = ChannelNumberAllocator::default();
    let mut last = 0;
    for _ in 0..0x4100 {
        let n = alloc.allocate();
        assert!(
            (turn::proto::chandata::MIN_CHANNEL_NUMBER..=turn::proto::chandata::MAX_CHANNEL_NUMBER)
                .contains(&n)
        );
        last = n;
    }
    assert_ne!(last, 0);
}
