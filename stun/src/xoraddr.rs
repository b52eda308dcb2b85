#[cfg(test)]
mod xoraddr_test;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::addr::*;
use crate::attributes::*;
use crate::error::*;
use crate::message::*;

/// XorMappedAddress represents the XOR-MAPPED-ADDRESS attribute.
///
/// The port is XOR-ed with the most significant 16 bits of the magic cookie;
/// an IPv4 address with the cookie itself, an IPv6 address with the
/// concatenation of cookie and transaction id.
///
/// RFC 5389 Section 15.2
#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub struct XorMappedAddress {
    pub ip: IpAddr,
    pub port: u16,
}

impl Default for XorMappedAddress {
    fn default() -> Self {
        XorMappedAddress {
            ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

impl fmt::Display for XorMappedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(_) => write!(f, "{}:{}", self.ip, self.port),
            IpAddr::V6(_) => write!(f, "[{}]:{}", self.ip, self.port),
        }
    }
}

impl Setter for XorMappedAddress {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        self.add_to_as(m, ATTR_XORMAPPED_ADDRESS)
    }
}

impl Getter for XorMappedAddress {
    fn get_from(&mut self, m: &Message) -> Result<()> {
        self.get_from_as(m, ATTR_XORMAPPED_ADDRESS)
    }
}

fn xor_mask(transaction_id: &TransactionId) -> [u8; IPV6_LEN] {
    let mut mask = [0u8; IPV6_LEN];
    mask[0..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    mask[4..].copy_from_slice(&transaction_id.0);
    mask
}

impl XorMappedAddress {
    /// Encodes the XOR-ed address value as attribute t; also used for
    /// XOR-PEER-ADDRESS and XOR-RELAYED-ADDRESS.
    pub fn add_to_as(&self, m: &mut Message, t: AttrType) -> Result<()> {
        let mask = xor_mask(&m.transaction_id);
        let xport = self.port ^ (MAGIC_COOKIE >> 16) as u16;

        let mut value = vec![0u8; 4];
        value[2..4].copy_from_slice(&xport.to_be_bytes());
        match self.ip {
            IpAddr::V4(ip) => {
                value[0..2].copy_from_slice(&FAMILY_IPV4.to_be_bytes());
                value.extend(ip.octets().iter().zip(mask.iter()).map(|(o, m)| o ^ m));
            }
            IpAddr::V6(ip) => {
                value[0..2].copy_from_slice(&FAMILY_IPV6.to_be_bytes());
                value.extend(ip.octets().iter().zip(mask.iter()).map(|(o, m)| o ^ m));
            }
        }
        m.add(t, &value);
        Ok(())
    }

    /// Decodes attribute t as a XOR-ed address value.
    pub fn get_from_as(&mut self, m: &Message, t: AttrType) -> Result<()> {
        let v = m.get(t)?;
        if v.len() <= 4 {
            return Err(Error::ErrUnexpectedEof);
        }

        let mask = xor_mask(&m.transaction_id);
        let family = u16::from_be_bytes([v[0], v[1]]);
        self.port = u16::from_be_bytes([v[2], v[3]]) ^ (MAGIC_COOKIE >> 16) as u16;
        match family {
            FAMILY_IPV4 => {
                if v[4..].len() < IPV4_LEN {
                    return Err(Error::ErrBadIpLength);
                }
                let mut ip = [0u8; IPV4_LEN];
                for (i, b) in ip.iter_mut().enumerate() {
                    *b = v[4 + i] ^ mask[i];
                }
                self.ip = IpAddr::V4(Ipv4Addr::from(ip));
            }
            FAMILY_IPV6 => {
                if v[4..].len() < IPV6_LEN {
                    return Err(Error::ErrBadIpLength);
                }
                let mut ip = [0u8; IPV6_LEN];
                for (i, b) in ip.iter_mut().enumerate() {
                    *b = v[4 + i] ^ mask[i];
                }
                self.ip = IpAddr::V6(Ipv6Addr::from(ip));
            }
            _ => return Err(Error::Other(format!("bad address family value {family}"))),
        }
        Ok(())
    }
}
