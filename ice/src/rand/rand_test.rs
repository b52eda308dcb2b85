use super::*;

#[test]
fn test_credential_shape() {
    for _ in 0..16 {
        let ufrag = generate_ufrag();
        let pwd = generate_pwd();
        assert_eq!(ufrag.len(), 4);
        assert_eq!(pwd.len(), 22);
        assert!(ufrag.bytes().all(|b| b.is_ascii_lowercase()));
        assert!(pwd.bytes().all(|b| b.is_ascii_lowercase()));
    }
}

#[test]
fn test_credentials_differ() {
    // not a randomness test, just a sanity guard against a constant seed
    let a = generate_pwd();
    let b = generate_pwd();
    assert_ne!(a, b);
}
