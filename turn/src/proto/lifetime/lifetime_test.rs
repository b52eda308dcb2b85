use super::*;

#[test]
fn test_lifetime_round_trip() -> stun::Result<()> {
    let mut m = Message::new();
    let l = Lifetime(Duration::from_secs(600));
    l.add_to(&mut m)?;

    assert_eq!(m.get(ATTR_LIFETIME)?, vec![0, 0, 0x02, 0x58]);

    let mut got = Lifetime::default();
    got.get_from(&m)?;
    assert_eq!(got, l);
    Ok(())
}

#[test]
fn test_lifetime_zero_releases() -> stun::Result<()> {
    let mut m = Message::new();
    Lifetime(Duration::ZERO).add_to(&mut m)?;

    let mut got = Lifetime::default();
    got.get_from(&m)?;
    assert_eq!(got.0, Duration::ZERO);
    Ok(())
}

#[test]
fn test_lifetime_bad_size() {
    let mut m = Message::new();
    m.add(ATTR_LIFETIME, &[0, 0, 1]);
    let mut got = Lifetime::default();
    assert_eq!(got.get_from(&m), Err(stun::Error::ErrAttributeSizeInvalid));
}
