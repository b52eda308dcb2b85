
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::attributes::*;
use crate::error::*;
use crate::message::*;

pub const FAMILY_IPV4: u16 = 0x01;
pub const FAMILY_IPV6: u16 = 0x02;
pub(crate) const IPV4_LEN: usize = 4;
pub(crate) const IPV6_LEN: usize = 16;

/// MappedAddress represents the MAPPED-ADDRESS attribute.
///
/// Kept in responses for RFC 3489 compatibility; modern peers read
/// XOR-MAPPED-ADDRESS instead.
///
/// RFC 5389 Section 15.1
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct MappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for MappedAddress {
    fn default() -> Self {
        MappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for MappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(_) => write!(f, "{}:{}", self.ip, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl Setter for MappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl Getter for MappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_MAPPED_ADDRESS)
    }
}

impl MappedAddress {
    /// Encodes the address value as attribute t.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let mut value = vec![0u8; 4];
        match self.ip {
            IpAddr::V4(ip) => {
                value[0..2].copy_from_slice(&FAMILY_IPV4.to_be_bytes());
                value[2..4].copy_from_slice(&self.port.to_be_bytes());
                value.extend_from_slice(&ip.octets());
            }
            IpAddr::V6(ip) => {
                value[0..2].copy_from_slice(&FAMILY_IPV6.to_be_bytes());
                value[2..4].copy_from_slice(&self.port.to_be_bytes());
                value.extend_from_slice(&ip.octets());
            }
        }
        m.add(t, &value);
        Ok(())
    }

    /// Decodes attribute t as an address value.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let family = u16::from_be_bytes([v[0], v[1]]);
        self.port = u16::from_be_bytes([v[2], v[3]]);
        match family {
            FAMILY_IPV4 => {
                if v[4..].len() < IPV4_LEN {
                    return Err(Error::ErrBadIpLength);
                }
                let mut ip = [0u8; IPV4_LEN];
                ip.copy_from_slice(&v[4..4 + IPV4_LEN]);
                self.ip = IpAddr::V4(Ipv4Addr::from(ip));
            }
            FAMILY_IPV6 => {
                if v[4..].len() < IPV6_LEN {
                    return Err(Error::ErrBadIpLength);
                }
                let mut ip = [0u8; IPV6_LEN];
                ip.copy_from_slice(&v[4..4 + IPV6_LEN]);
                self.ip = IpAddr::V6(Ipv6Addr::from(ip));
            }
            _ => return Err(Error::Other(format!("bad address family value {family}"))),
        }
        Ok(())
    }
}
