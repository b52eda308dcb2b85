use super::*;

#[test]
fn test_attr_type_ranges() {
    assert!(ATTR_USERNAME.required());
    assert!(!ATTR_USERNAME.optional());
    assert!(ATTR_FINGERPRINT.optional());
    assert!(ATTR_ICE_CONTROLLING.optional());
    assert!(ATTR_PRIORITY.required());
}

#[test]
fn test_attr_type_display() {
    assert_eq!(ATTR_XORMAPPED_ADDRESS.to_string(), "XOR-MAPPED-ADDRESS");
    assert_eq!(ATTR_USE_CANDIDATE.to_string(), "USE-CANDIDATE");
    assert_eq!(AttrType(0x7eef).to_string(), "0x7eef");
}

#[test]
fn test_padded_length() {
    assert_eq!(padded_length(0), 0);
    assert_eq!(padded_length(1), 4);
    assert_eq!(padded_length(4), 4);
    assert_eq!(padded_length(5), 8);
    assert_eq!(padded_length(20), 20);
}

#[test]
fn test_attributes_get_first() {
    let mut m = Message::new();
    m.add(ATTR_XOR_PEER_ADDRESS, &[1]);
    m.add(ATTR_XOR_PEER_ADDRESS, &[2]);

    let a = m.attributes.get(ATTR_XOR_PEER_ADDRESS).unwrap();
    assert_eq!(a.value, vec![1]);
    assert!(m.attributes.get(ATTR_DATA).is_none());
}
