#[cfg(test)]
mod net_test;

use std::net::{IpAddr, SocketAddr, UdpSocket};

/// Returns true for RFC 1918 IPv4 ranges and IPv6 unique-local addresses.
pub fn is_lan(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(v6) => v6.octets()[0] & 0xfe == 0xfc,
    }
}

/// Returns true for 169.254/16 and fe80::/10.
pub fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => v6.octets()[0] == 0xfe && v6.octets()[1] & 0xc0 == 0x80,
    }
}

/// Loopback, LAN, link-local and public are mutually exclusive; an address
/// that is none of the first three (and not unspecified) is public.
pub fn is_public(ip: &IpAddr) -> bool {
    !ip.is_loopback() && !ip.is_unspecified() && !is_lan(ip) && !is_link_local(ip)
}

/// Enumerates the local unicast interface addresses.
pub fn local_interfaces() -> Vec<IpAddr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(ifas) => ifas.into_iter().map(|(_, ip)| ip).collect(),
        Err(e) => {
            log::error!("failed to enumerate network interfaces: {e}");
            Vec::new()
        }
    }
}

/// Finds the local interface the OS would route packets to `target` from.
/// Uses a connected UDP socket; no packet is sent.
pub fn best_source_interface(target: IpAddr) -> Option<IpAddr> {
    if target.is_loopback() {
        return Some(target);
    }

    let bind_addr: SocketAddr = match target {
        IpAddr::V4(_) => "0.0.0.0:0".parse().ok()?,
        IpAddr::V6(_) => "[::]:0".parse().ok()?,
    };
    let socket = UdpSocket::bind(bind_addr).ok()?;
    socket.connect(SocketAddr::new(target, 9)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}
