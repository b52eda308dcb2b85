use super::*;

/// RFC 5769 2.2, sample IPv4 response.
const SAMPLE_RESPONSE: &[u8] = &[
    0x01, 0x01, 0x00, 0x3c, 0x21, 0x12, 0xa4, 0x42, 0xb7, 0xe7, 0xa7, 0x01, 0xbc, 0x34, 0xd6,
    0x86, 0xfa, 0x87, 0xdf, 0xae, 0x80, 0x22, 0x00, 0x0b, 0x74, 0x65, 0x73, 0x74, 0x20, 0x76,
    0x65, 0x63, 0x74, 0x6f, 0x72, 0x20, 0x00, 0x20, 0x00, 0x08, 0x00, 0x01, 0xa1, 0x47, 0xe1,
    0x12, 0xa6, 0x43, 0x00, 0x08, 0x00, 0x14, 0x2b, 0x91, 0xf5, 0x99, 0xfd, 0x9e, 0x90, 0xc3,
    0x8c, 0x74, 0x89, 0xf9, 0x2a, 0xf9, 0xba, 0x53, 0xf0, 0x6b, 0xe7, 0xd7, 0x80, 0x28, 0x00,
    0x04, 0xc0, 0x7d, 0x4c, 0x96,
];

#[test]
fn test_xor_mapped_address_rfc5769_vector() -> Result<()> {
    let mut m = Message::new();
    m.write(SAMPLE_RESPONSE)?;

    let mut addr = XorMappedAddress::default();
    addr.get_from(&m)?;
    assert_eq!(addr.ip, IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)));
    assert_eq!(addr.port, 32853);
    Ok(())
}

#[test]
fn test_xor_mapped_address_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.new_transaction_id();
    let addr = XorMappedAddress {
        ip: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)),
        port: 40000,
    };
    addr.add_to(&mut m)?;

    let mut got = XorMappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got, addr);
    Ok(())
}

#[test]
fn test_xor_mapped_address_v6_round_trip() -> Result<()> {
    let mut m = Message::new();
    m.new_transaction_id();
    let addr = XorMappedAddress {
        ip: "2001:db8::21".parse().unwrap(),
        port: 49152,
    };
    addr.add_to(&mut m)?;

    let mut got = XorMappedAddress::default();
    got.get_from(&m)?;
    assert_eq!(got, addr);
    Ok(())
}

#[test]
fn test_xor_peer_address_as() -> Result<()> {
    let mut m = Message::new();
    m.new_transaction_id();
    let addr = XorMappedAddress {
        ip: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 1)),
        port: 49152,
    };
    addr.add_to_as(&mut m, ATTR_XOR_PEER_ADDRESS)?;

    let mut got = XorMappedAddress::default();
    got.get_from_as(&m, ATTR_XOR_PEER_ADDRESS)?;
    assert_eq!(got, addr);
    assert!(!m.contains(ATTR_XORMAPPED_ADDRESS));
    Ok(())
}
