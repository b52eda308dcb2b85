#[cfg(test)]
mod reqtrans_test;

use std::fmt;

use stun::attributes::ATTR_REQUESTED_TRANSPORT;
use stun::message::*;

/// Protocol is an IANA protocol number carried in REQUESTED-TRANSPORT.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol(pub u8);

/// UDP, the only transport a relay allocation may request here.
pub const PROTO_UDP: Protocol = Protocol(17);

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == PROTO_UDP {
            write!(f, "UDP")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

const REQUESTED_TRANSPORT_SIZE: usize = 4; // protocol + 3 bytes RFFU

/// RequestedTransport represents the REQUESTED-TRANSPORT attribute of an
/// Allocate request.
///
/// RFC 5766 Section 14.7
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedTransport {
    pub protocol: Protocol,
}

impl Default for RequestedTransport {
    fn default() -> Self {
        RequestedTransport {
            protocol: PROTO_UDP,
        }
    }
}

impl fmt::Display for RequestedTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol: {}", self.protocol)
    }
}

impl Setter for RequestedTransport {
    fn add_to(&self, m: &mut Message) -> stun::Result<()> {
        let mut v = [0u8; REQUESTED_TRANSPORT_SIZE];
        v[0] = self.protocol.0;
        m.add(ATTR_REQUESTED_TRANSPORT, &v);
        Ok(())
    }
}

impl Getter for RequestedTransport {
    fn get_from(&mut self, m: &Message) -> stun::Result<()> {
        let v = m.get(ATTR_REQUESTED_TRANSPORT)?;
        if v.len() != REQUESTED_TRANSPORT_SIZE {
            return Err(stun::Error::ErrAttributeSizeInvalid);
        }
        self.protocol = Protocol(v[0]);
        Ok(())
    }
}
