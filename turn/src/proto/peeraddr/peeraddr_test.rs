use super::*;

#[test]
fn test_peer_address_round_trip() -> stun::Result<()> {
    let mut m = Message::new();
    m.new_transaction_id();
    let peer = PeerAddress {
        ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 8)),
        port: 52000,
    };
    peer.add_to(&mut m)?;

    let mut got = PeerAddress::default();
    got.get_from(&m)?;
    assert_eq!(got, peer);
    assert_eq!(got.to_string(), "203.0.113.8:52000");
    Ok(())
}

#[test]
fn test_multiple_peer_addresses() -> stun::Result<()> {
    // CreatePermission carries one XOR-PEER-ADDRESS per authorized peer
    let mut m = Message::new();
    m.new_transaction_id();
    for ip in [[203, 0, 113, 8], [198, 51, 100, 20]] {
        PeerAddress {
            ip: IpAddr::V4(Ipv4Addr::from(ip)),
            port: 0,
        }
        .add_to(&mut m)?;
    }

    let count = m
        .attributes
        .0
        .iter()
        .filter(|a| a.typ == ATTR_XOR_PEER_ADDRESS)
        .count();
    assert_eq!(count, 2);
    Ok(())
}
