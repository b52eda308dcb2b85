use super::*;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

#[test]
fn test_classifications_are_exclusive() {
    let cases = [
        ("127.0.0.1", true, false, false, false),
        ("10.0.0.1", false, true, false, false),
        ("172.16.8.1", false, true, false, false),
        ("172.32.0.1", false, false, false, true),
        ("192.168.1.10", false, true, false, false),
        ("169.254.1.2", false, false, true, false),
        ("8.8.8.8", false, false, false, true),
        ("203.0.113.5", false, false, false, true),
        ("::1", true, false, false, false),
        ("fd00::1", false, true, false, false),
        ("fe80::1", false, false, true, false),
        ("2001:db8::1", false, false, false, true),
    ];

    for (addr, loopback, lan, link_local, public) in cases {
        let ip = ip(addr);
        assert_eq!(ip.is_loopback(), loopback, "{addr} loopback");
        assert_eq!(is_lan(&ip), lan, "{addr} lan");
        assert_eq!(is_link_local(&ip), link_local, "{addr} link-local");
        assert_eq!(is_public(&ip), public, "{addr} public");
    }
}

#[test]
fn test_unspecified_is_not_public() {
    assert!(!is_public(&ip("0.0.0.0")));
    assert!(!is_public(&ip("::")));
}

#[test]
fn test_best_source_interface_loopback() {
    assert_eq!(best_source_interface(ip("127.0.0.1")), Some(ip("127.0.0.1")));
}
