use super::*;

#[test]
fn test_username_round_trip() -> Result<()> {
    let mut m = Message::new();
    let username = TextAttribute::new(ATTR_USERNAME, "remoteufrag:localufrag".to_owned());
    username.add_to(&mut m)?;

    let got = TextAttribute::get_from_as(&m, ATTR_USERNAME)?;
    assert_eq!(got, username);
    Ok(())
}

#[test]
fn test_realm_nonce_round_trip() -> Result<()> {
    let mut m = Message::new();
    TextAttribute::new(ATTR_REALM, "example.org".to_owned()).add_to(&mut m)?;
    TextAttribute::new(ATTR_NONCE, "n1".to_owned()).add_to(&mut m)?;

    assert_eq!(TextAttribute::get_from_as(&m, ATTR_REALM)?.text, "example.org");
    assert_eq!(TextAttribute::get_from_as(&m, ATTR_NONCE)?.text, "n1");
    Ok(())
}

#[test]
fn test_text_attribute_overflow() {
    let mut m = Message::new();
    let oversize = TextAttribute::new(ATTR_REALM, "x".repeat(1024));
    assert_eq!(oversize.add_to(&mut m), Err(Error::ErrAttributeSizeOverflow));
}

#[test]
fn test_text_attribute_wrong_type() {
    let mut m = Message::new();
    let attr = TextAttribute::new(ATTR_PRIORITY, "nope".to_owned());
    assert!(attr.add_to(&mut m).is_err());
    assert!(TextAttribute::get_from_as(&m, ATTR_PRIORITY).is_err());
}
