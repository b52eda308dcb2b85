
use std::fmt;

use stun::attributes::ATTR_REQUESTED_ADDRESS_FAMILY;
use stun::message::*;

const REQUESTED_FAMILY_SIZE: usize = 4; // family + 3 bytes reserved

/// RequestedAddressFamily represents the REQUESTED-ADDRESS-FAMILY attribute
/// of an Allocate request, used to obtain a relay of the other family than
/// the wire transport.
///
/// RFC 6156 Section 4.1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedAddressFamily {
    IPv4,
    IPv6,
}

impl RequestedAddressFamily {
    pub fn value(&self) -> u8 {
        match self {
            RequestedAddressFamily::IPv4 => 0x01,
            RequestedAddressFamily::IPv6 => 0x02,
        }
    }
}

impl fmt::Display for RequestedAddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedAddressFamily::IPv4 => write!(f, "IPv4"),
            RequestedAddressFamily::IPv6 => write!(f, "IPv6"),
        }
    }
}

impl Setter for RequestedAddressFamily {
    fn add_to(&self, m: &mut Message) -> stun::Result<()> {
        let mut v = [0u8; REQUESTED_FAMILY_SIZE];
        v[0] = self.value();
        m.add(ATTR_REQUESTED_ADDRESS_FAMILY, &v);
        Ok(())
    }
}

impl Getter for RequestedAddressFamily {
    fn get_from(&mut self, m: &Message) -> stun::Result<()> {
        let v = m.get(ATTR_REQUESTED_ADDRESS_FAMILY)?;
        if v.len() != REQUESTED_FAMILY_SIZE {
            return Err(stun::Error::ErrAttributeSizeInvalid);
        }
        *self = match v[0] {
            0x01 => RequestedAddressFamily::IPv4,
            0x02 => RequestedAddressFamily::IPv6,
            other => {
                return Err(stun::Error::Other(format!(
                    "invalid requested address family value {other}"
                )))
            }
        };
        Ok(())
    }
}
