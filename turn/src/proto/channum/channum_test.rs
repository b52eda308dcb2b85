use super::*;

#[test]
fn test_channel_number_round_trip() -> stun::Result<()> {
    let mut m = Message::new();
    let n = ChannelNumber(0x4123);
    n.add_to(&mut m)?;

    let mut got = ChannelNumber::default();
    got.get_from(&m)?;
    assert_eq!(got, n);
    assert!(got.valid());
    Ok(())
}

#[test]
fn test_channel_number_range() {
    assert!(!ChannelNumber(0x3FFF).valid());
    assert!(ChannelNumber(0x4000).valid());
    assert!(ChannelNumber(0x7FFE).valid());
    assert!(!ChannelNumber(0x7FFF).valid());
}

#[test]
fn test_channel_number_short_value() {
    let mut m = Message::new();
    m.add(stun::attributes::ATTR_CHANNEL_NUMBER, &[0x40]);
    let mut got = ChannelNumber::default();
    assert!(got.get_from(&m).is_err());
}
