use super::*;

#[test]
fn test_requested_transport_round_trip() -> stun::Result<()> {
    let mut m = Message::new();
    let rt = RequestedTransport::default();
    rt.add_to(&mut m)?;

    assert_eq!(m.get(ATTR_REQUESTED_TRANSPORT)?, vec![17, 0, 0, 0]);

    let mut got = RequestedTransport {
        protocol: Protocol(0),
    };
    got.get_from(&m)?;
    assert_eq!(got.protocol, PROTO_UDP);
    Ok(())
}

#[test]
fn test_requested_transport_bad_size() {
    let mut m = Message::new();
    m.add(ATTR_REQUESTED_TRANSPORT, &[17]);
    let mut got = RequestedTransport::default();
    assert_eq!(got.get_from(&m), Err(stun::Error::ErrAttributeSizeInvalid));
}
